//! Image export: materialize local images and publish them to a registry

pub mod pusher;
pub mod writer;

pub use pusher::{ExportOutcome, ImagePusher, PushRequest, Pushable, PusherOpt};
pub use writer::{ExportableImage, ImageWriter, WriterOpt};
