pub mod amortization;
pub mod exit;
pub mod pipeline;
pub mod projection;
pub mod returns;
