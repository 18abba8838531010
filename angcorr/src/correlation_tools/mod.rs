pub mod legendre;
pub mod peak_find;
pub mod peak_fit;
pub mod pipeline;
pub mod slicer;
pub mod weights;
