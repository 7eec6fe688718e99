mod codec;
mod result;

pub use codec::CodecError;
pub use codec::Command;
pub use result::ApplyError;
pub use result::CommandOutput;
pub use result::CommandResult;
pub use result::CommandWaitError;
