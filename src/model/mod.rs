//! Model module: the ResNeXt classifier built with Burn
//!
//! The network is constructed from a [`ResNeXtConfig`]; trained weights are
//! restored by [`crate::checkpoint`].

pub mod resnext;

pub use resnext::{Bottleneck, ClassifierHead, Downsample, ResNeXt, ResNeXtConfig};
