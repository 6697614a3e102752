pub(crate) mod command;
pub(crate) mod scan;
pub(crate) mod ui;
pub(crate) mod watch;

pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::scan::ScanArgs;
pub use self::watch::WatchArgs;
