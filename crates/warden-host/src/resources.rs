//! Reference native resources
//!
//! Small bindings that make the console host usable. Each takes and returns
//! plain data only.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, warn};
use warden_core::{NativeResource, PlainValue, WardenError, WardenResult};

fn unknown_method(kind: &str, method: &str) -> WardenError {
    WardenError::NotFound(format!("{}.{}", kind, method))
}

fn string_arg<'a>(args: &'a [PlainValue], index: usize, what: &str) -> WardenResult<&'a str> {
    args.get(index)
        .and_then(PlainValue::as_str)
        .ok_or_else(|| WardenError::InvalidArgument(format!("{} must be a string", what)))
}

/// `console`: text output
pub struct Console {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Console {
    pub fn stdout() -> Self {
        Console::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Console { out: Mutex::new(out) }
    }

    fn emit(&self, args: &[PlainValue], newline: bool) -> WardenResult<PlainValue> {
        let text: Vec<String> = args.iter().map(PlainValue::to_display_string).collect();
        let mut out = self
            .out
            .lock()
            .map_err(|_| WardenError::Io("console writer poisoned".into()))?;
        out.write_all(text.join(" ").as_bytes())?;
        if newline {
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(PlainValue::Null)
    }
}

impl NativeResource for Console {
    fn kind(&self) -> &str {
        "console"
    }

    fn invoke(&self, method: &str, args: &[PlainValue]) -> WardenResult<PlainValue> {
        match method {
            "print" | "log" => self.emit(args, true),
            "write" => self.emit(args, false),
            other => Err(unknown_method("console", other)),
        }
    }

    fn release(&mut self) {
        match self.out.get_mut() {
            Ok(out) => {
                if let Err(e) = out.flush() {
                    warn!(error = %e, "console flush failed during release");
                }
            }
            Err(_) => warn!("console writer poisoned during release"),
        }
    }
}

/// Process-level state shared between the `core` capability and the host loop
#[derive(Debug)]
pub struct HostControl {
    exit_requested: AtomicBool,
    exit_code: AtomicI32,
    interactive: AtomicBool,
    started: Instant,
}

impl HostControl {
    pub fn new(interactive: bool) -> Self {
        HostControl {
            exit_requested: AtomicBool::new(false),
            exit_code: AtomicI32::new(0),
            interactive: AtomicBool::new(interactive),
            started: Instant::now(),
        }
    }

    pub fn request_exit(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
        self.exit_requested.store(true, Ordering::SeqCst);
    }

    /// Exit code requested by a script, if any
    pub fn exit_requested(&self) -> Option<i32> {
        self.exit_requested
            .load(Ordering::SeqCst)
            .then(|| self.exit_code.load(Ordering::SeqCst))
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive.load(Ordering::SeqCst)
    }

    pub fn set_interactive(&self, interactive: bool) {
        self.interactive.store(interactive, Ordering::SeqCst);
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for HostControl {
    fn default() -> Self {
        HostControl::new(true)
    }
}

/// `core`: host loop control
pub struct Core {
    control: std::sync::Arc<HostControl>,
}

impl Core {
    pub fn new(control: std::sync::Arc<HostControl>) -> Self {
        Core { control }
    }
}

impl NativeResource for Core {
    fn kind(&self) -> &str {
        "core"
    }

    fn invoke(&self, method: &str, args: &[PlainValue]) -> WardenResult<PlainValue> {
        match method {
            "exit" => {
                let code = args.first().and_then(PlainValue::as_f64).unwrap_or(0.0);
                debug!(code, "exit requested");
                self.control.request_exit(code as i32);
                Ok(PlainValue::Null)
            }
            "ms" => Ok(PlainValue::Number(self.control.elapsed_ms().floor())),
            "set_interactive" => {
                let flag = args
                    .first()
                    .and_then(PlainValue::as_bool)
                    .ok_or_else(|| WardenError::InvalidArgument("set_interactive expects a boolean".into()))?;
                self.control.set_interactive(flag);
                Ok(PlainValue::Null)
            }
            "is_interactive" => Ok(PlainValue::Bool(self.control.is_interactive())),
            other => Err(unknown_method("core", other)),
        }
    }
}

/// `env`: read-only view of the process environment
#[derive(Debug, Default)]
pub struct Environment;

impl NativeResource for Environment {
    fn kind(&self) -> &str {
        "env"
    }

    fn invoke(&self, method: &str, args: &[PlainValue]) -> WardenResult<PlainValue> {
        match method {
            "get" => {
                let name = string_arg(args, 0, "variable name")?;
                Ok(std::env::var(name).map(PlainValue::String).unwrap_or(PlainValue::Null))
            }
            "vars" => Ok(PlainValue::Object(
                std::env::vars().map(|(k, v)| (k, PlainValue::String(v))).collect(),
            )),
            other => Err(unknown_method("env", other)),
        }
    }
}

/// `options`: the `[options]` table of the configuration
#[derive(Debug, Default)]
pub struct Options {
    values: BTreeMap<String, String>,
}

impl Options {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Options { values }
    }
}

impl NativeResource for Options {
    fn kind(&self) -> &str {
        "options"
    }

    fn invoke(&self, method: &str, args: &[PlainValue]) -> WardenResult<PlainValue> {
        match method {
            "get" => {
                let key = string_arg(args, 0, "option name")?;
                Ok(self
                    .values
                    .get(key)
                    .map(|v| PlainValue::String(v.clone()))
                    .or_else(|| args.get(1).cloned())
                    .unwrap_or(PlainValue::Null))
            }
            "keys" => Ok(PlainValue::Array(
                self.values.keys().map(|k| PlainValue::String(k.clone())).collect(),
            )),
            other => Err(unknown_method("options", other)),
        }
    }
}

/// `process-exec`: run a program to completion and capture its output
#[derive(Debug, Default)]
pub struct ProcessExec;

impl NativeResource for ProcessExec {
    fn kind(&self) -> &str {
        "process-exec"
    }

    fn invoke(&self, method: &str, args: &[PlainValue]) -> WardenResult<PlainValue> {
        if method != "run" {
            return Err(unknown_method("process-exec", method));
        }
        let program = string_arg(args, 0, "program")?;
        let argv: Vec<&str> = match args.get(1) {
            None | Some(PlainValue::Null) => Vec::new(),
            Some(PlainValue::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| WardenError::InvalidArgument("arguments must be strings".into()))
                })
                .collect::<WardenResult<_>>()?,
            Some(_) => return Err(WardenError::InvalidArgument("arguments must be a list".into())),
        };

        debug!(program, args = argv.len(), "running process");
        let output = Command::new(program).args(&argv).output()?;

        let mut result = BTreeMap::new();
        result.insert(
            "status".to_string(),
            output.status.code().map_or(PlainValue::Null, |c| PlainValue::Number(c as f64)),
        );
        result.insert(
            "stdout".to_string(),
            PlainValue::String(String::from_utf8_lossy(&output.stdout).into_owned()),
        );
        result.insert(
            "stderr".to_string(),
            PlainValue::String(String::from_utf8_lossy(&output.stderr).into_owned()),
        );
        Ok(PlainValue::Object(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn console_prints_display_strings() {
        let buf = SharedBuf::default();
        let console = Console::with_writer(Box::new(buf.clone()));
        console
            .invoke("print", &[PlainValue::from("n ="), PlainValue::Number(3.0)])
            .expect("print");
        console.invoke("write", &[PlainValue::from("x")]).expect("write");
        assert_eq!(String::from_utf8(buf.0.lock().expect("buffer").clone()).expect("utf8"), "n = 3\nx");
        assert!(matches!(console.invoke("beep", &[]), Err(WardenError::NotFound(_))));
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn console_flush_failures_surface_as_errors() {
        let mut console = Console::with_writer(Box::new(BrokenPipe));
        assert!(matches!(console.invoke("print", &["x".into()]), Err(WardenError::Io(_))));
        // teardown reports the failure instead of panicking
        console.release();
    }

    #[test]
    fn core_records_exit_and_interactivity() {
        let control = Arc::new(HostControl::new(true));
        let core = Core::new(control.clone());
        assert_eq!(control.exit_requested(), None);
        core.invoke("exit", &[PlainValue::Number(3.0)]).expect("exit");
        assert_eq!(control.exit_requested(), Some(3));

        core.invoke("set_interactive", &[PlainValue::Bool(false)]).expect("set");
        assert!(!control.is_interactive());
        assert!(matches!(
            core.invoke("set_interactive", &[PlainValue::from("no")]),
            Err(WardenError::InvalidArgument(_))
        ));
        assert!(core.invoke("ms", &[]).expect("ms").as_f64().is_some());
    }

    #[test]
    fn options_lookup_with_fallback() {
        let mut values = BTreeMap::new();
        values.insert("greeting".to_string(), "hello".to_string());
        let options = Options::new(values);
        assert_eq!(options.invoke("get", &["greeting".into()]).expect("get"), PlainValue::from("hello"));
        assert_eq!(
            options.invoke("get", &["missing".into(), "dflt".into()]).expect("get"),
            PlainValue::from("dflt")
        );
        assert_eq!(options.invoke("keys", &[]).expect("keys").to_json(), r#"["greeting"]"#);
    }

    #[test]
    fn environment_reads_variables() {
        let env = Environment;
        let path = env.invoke("get", &["PATH".into()]).expect("get");
        assert_eq!(path.as_str().map(str::to_string), std::env::var("PATH").ok());
        assert!(matches!(env.invoke("get", &[]), Err(WardenError::InvalidArgument(_))));
    }

    #[cfg(unix)]
    #[test]
    fn process_exec_captures_output() {
        let result = ProcessExec
            .invoke("run", &["echo".into(), PlainValue::Array(vec!["hi".into()])])
            .expect("run");
        assert_eq!(result.get("status"), Some(&PlainValue::Number(0.0)));
        assert_eq!(result.get("stdout"), Some(&PlainValue::from("hi\n")));
    }
}
