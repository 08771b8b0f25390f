//! Storage backend implementations.
//!
//! A backend provides a concrete type implementing [`CsiIdentity`],
//! [`CsiController`] and [`CsiNode`].
//!
//! [`CsiIdentity`]: crate::identity::CsiIdentity
//! [`CsiController`]: crate::controller::CsiController
//! [`CsiNode`]: crate::node::CsiNode

pub mod rclone;

pub use self::rclone::RcloneBackend;
