//! Spark operator core: annotation codec, owner references, role labels and the shutdown signal.

#![forbid(unsafe_code)]

pub mod codec;
pub mod hash;
pub mod labels;
pub mod owner;
pub mod signal;

pub use codec::{decode, encode, Canonical, CodecError};
pub use hash::Hash32;
pub use owner::{owner_reference_for, ManagedKind};
pub use signal::{ShutdownObserver, ShutdownSignal};

pub mod prelude {
    pub use super::labels::{is_driver, is_executor, is_managed_launch};
    pub use super::{
        decode, encode, owner_reference_for, Canonical, CodecError, Hash32, ManagedKind,
        ShutdownObserver, ShutdownSignal,
    };
}
