pub mod bits;
pub mod builder;
pub mod carrier;
pub mod crypto;
pub mod handles;
pub mod loadopts;
pub mod mode;
pub mod placement;
pub mod protocol;
pub mod raster;
pub mod saver;
pub mod section;
pub mod session;
pub mod transform;
pub mod usedmap;
pub mod wire;

pub use builder::StegBuilder;
pub use crypto::{CipherId, KdfId, KdfParams, PasswordProvider, StaticPasswords};
pub use handles::{Loaded, StegFile, StegPartialFile, StegText};
pub use mode::{Mode, ModeMask, Submode};
pub use protocol::{Protocol, ProtocolError, SaveOutput, SaveRequest};
pub use raster::{CarrierProvider, FsProvider, ImageRef, MemoryProvider, PixelBuf};
pub use section::{ClearKind, HonorMask, SectionSpec};
pub use transform::Compression;
