pub mod cancellation;
pub mod color_value;
pub mod differential_evolution;
pub mod formula;
pub mod mixing;
pub mod optimizer;
pub mod paint;
pub mod parzen;
pub mod subset;
pub mod utils;
