use colored::Colorize;
use ember::error::Backtrace;
use ember::reporter::{Report, Reporter};

pub struct CliReporter {
    pub errors_count: usize,
    pub warnings_count: usize,
    pub had_runtime_error: bool,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            errors_count: 0,
            warnings_count: 0,
            had_runtime_error: false,
        }
    }

    pub fn had_error(&self) -> bool {
        self.errors_count > 0
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Reporter<'a> for CliReporter {
    fn warning(&mut self, report: Report) {
        self.warnings_count += 1;
        eprintln!("{}", format!("warning: {}", report).yellow());
    }

    fn error(&mut self, report: Report) {
        self.errors_count += 1;
        eprintln!("{}", format!("{}", report).red());
    }

    fn runtime_error(&mut self, msg: &str, backtrace: &[(Option<String>, u32)]) {
        self.had_runtime_error = true;
        eprintln!("{}", msg.red());
        eprint!("{}", Backtrace(backtrace.to_vec()));
    }
}
