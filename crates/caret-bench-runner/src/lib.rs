pub mod environment;
pub mod extract;
pub mod orchestrator;
pub mod probe;
pub mod process;
pub mod report;
pub mod subjects;

pub use environment::EnvironmentInfo;
pub use extract::{DedupSummary, Extracted, LoadedMarker, PrefixMarker, ResultExtractor};
pub use orchestrator::{Orchestrator, RunEvent, Timeouts};
pub use probe::{BsdTime, GnuTime, MemoryProbe, NoProbe};
pub use process::{ProcessOutput, ResourceMeter};
pub use report::{format_memory, format_time, render, render_environment, ReportOptions};
pub use subjects::{Caret, Invocation, PythonBaseline, Subject, DEFAULT_PYTHON};
