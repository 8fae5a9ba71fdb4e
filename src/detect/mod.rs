mod backend;
mod stub;

pub use backend::DetectorBackend;
pub use stub::StubBackend;
