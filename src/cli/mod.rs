pub(crate) mod command;
pub(crate) mod control;
pub(crate) mod decode;

pub use self::command::{Args, Command, FakeArgs, LogLevel, ModelArg, OutputFormat};
pub use self::control::{ControlAction, ControlArgs};
pub use self::decode::DecodeArgs;
