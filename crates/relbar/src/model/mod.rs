//! Generator and discriminator networks, plus the tensor bridge between
//! host-side token sequences and burn tensors.

pub mod bridge;
pub mod discriminator;
pub mod generator;
