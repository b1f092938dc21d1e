pub mod executor;
pub mod request;

pub use executor::Prober;
pub use request::RequestTarget;
