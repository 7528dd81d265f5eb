//! Dependency ports consumed by the orchestration core. Production
//! implementations live next to each trait; tests substitute mocks.

pub mod clock;
pub mod filesystem;
pub mod process;
pub mod prompter;

pub use clock::{Clock, MockClock, SystemClock};
pub use filesystem::{FileStat, FileSystem, StdFileSystem, WriteOptions};
pub use process::{ProcessRunner, SpawnOptions, SpawnResult, SubprocessRunner, DEFAULT_TAIL_LINES};
pub use prompter::{NullPrompter, Prompter, SelectOption, TerminalPrompter, Validator};
