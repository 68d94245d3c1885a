// ─── Instance Assembly ───
// Directory layout plus the high-level installer that ties manifest,
// catalog resolution, batch download, overrides and backup together.

mod assembler;
mod layout;

pub use assembler::{InstallOptions, InstanceAssembler};
pub use layout::InstanceLayout;
