use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use warden_core::{
    CapabilityDecl, CapabilityRegistry, Engine, MixinMode, PlainValue, SandboxOptions, TrustTier, Value,
    WardenConfig, WardenError,
};
use warden_host::{HostControl, HostProvider};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().expect("capture").clone()).expect("utf8")
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("capture").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Host {
    engine: Engine,
    control: Arc<HostControl>,
    console: Captured,
}

fn host() -> Host {
    let mut config = WardenConfig::new();
    config.capabilities = vec![
        CapabilityDecl::new("console", TrustTier::Sandboxed),
        CapabilityDecl::new("core", TrustTier::Trusted),
        CapabilityDecl::new("options", TrustTier::Sandboxed),
        CapabilityDecl::new("process-exec", TrustTier::Trusted),
    ];
    config.options.insert("mode".to_string(), "test".to_string());

    let control = Arc::new(HostControl::new(false));
    let console = Captured::default();
    let mut provider = HostProvider::new(control.clone())
        .with_options(config.options.clone())
        .with_console(Box::new(console.clone()));
    let registry = CapabilityRegistry::bootstrap(&config.capabilities, &mut provider).expect("bootstrap");
    let engine = Engine::new(config, registry).expect("engine");
    Host { engine, control, console }
}

fn script(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(text.as_bytes()).expect("write script");
    file
}

#[test]
fn trusted_and_sandboxed_code_share_the_console() {
    let mut host = host();
    host.engine.eval_string("console.print('trusted', 1 + 1)").expect("trusted print");
    host.engine
        .eval_sandbox("console.print('sandboxed', options.get('mode'))", &SandboxOptions::new())
        .expect("sandboxed print");
    assert_eq!(host.console.text(), "trusted 2\nsandboxed test\n");
}

#[test]
fn sandbox_denials_are_catchable_and_leave_the_host_alone() {
    let mut host = host();
    let kind = host
        .engine
        .eval_sandbox("let k; try { core.exit(9); } catch (e) { k = e.kind; } k", &SandboxOptions::new())
        .expect("caught");
    assert_eq!(kind, Value::str("CapabilityDenied"));
    assert_eq!(host.control.exit_requested(), None);

    let err = host
        .engine
        .eval_sandbox("process_exec.run('sh', ['-c', 'echo owned'])", &SandboxOptions::new())
        .expect_err("denied");
    assert!(matches!(err, WardenError::CapabilityDenied { ref tag } if tag == "process-exec"));
}

#[test]
fn trusted_code_can_request_exit() {
    let mut host = host();
    host.engine.eval_string("core.exit(4)").expect("exit");
    assert_eq!(host.control.exit_requested(), Some(4));
}

#[test]
fn module_functions_keep_their_sandbox_tier_when_called_from_trusted_code() {
    let mut host = host();
    let module = script("export fn quit(code) { core.exit(code); }\nexport fn shout(s) { console.print(s + '!'); return s; }");
    let exports = host.engine.load_module(module.path()).expect("module loads");
    host.engine.set_global("m", exports);

    assert_eq!(host.engine.eval_string("m.shout('hey')").expect("console allowed"), Value::str("hey"));
    assert_eq!(host.console.text(), "hey!\n");

    let err = host.engine.eval_string("m.quit(1)").expect_err("core is trusted only");
    assert!(matches!(err, WardenError::CapabilityDenied { .. }));
    assert_eq!(host.control.exit_requested(), None);
}

#[test]
fn mixins_extend_host_records() {
    let mut host = host();
    let target = host.engine.new_object().expect("record");
    host.engine.set_member(&target, "name", Value::str("box")).expect("member");

    let mixin = script("export fn describe(o) { return 'a ' + o.name; }");
    host.engine.load_mixin(mixin.path(), &target, MixinMode::Reject).expect("mixin");
    host.engine.set_global("target", target.clone());
    assert_eq!(
        host.engine.eval_string("target.describe(target)").expect("call"),
        Value::str("a box")
    );

    let clash = script("let secret = 1;\nexport name = 'other';");
    let err = host.engine.load_mixin(clash.path(), &target, MixinMode::Reject).expect_err("collision");
    assert!(matches!(err, WardenError::Collision { ref member } if member == "name"));
    host.engine.load_mixin(clash.path(), &target, MixinMode::Overwrite).expect("overwrite");
    assert_eq!(host.engine.get_member(&target, "name").expect("member"), Value::str("other"));
    assert_eq!(host.engine.get_member(&target, "secret").expect("member"), Value::Null);
    assert_eq!(
        host.engine.eval_string("target.describe(target)").expect("call"),
        Value::str("a other")
    );
}

#[test]
fn untrusted_file_reaches_a_sandbox_only_as_data() {
    let mut host = host();
    let data = script(r#"{"user": "ana", "scores": [3, 4, 5]}"#);
    let payload = host.engine.load_json(data.path()).expect("json");

    let result = host
        .engine
        .eval_sandbox(
            "let t = 0; let i = 0; while (i < p.scores.length) { t = t + p.scores[i]; i = i + 1; } {user: p.user, total: t}",
            &SandboxOptions::new().inject_value("p", payload),
        )
        .expect("sandbox");
    let exported = host.engine.export(&result).expect("plain");

    let mut expected = BTreeMap::new();
    expected.insert("total".to_string(), PlainValue::Number(12.0));
    expected.insert("user".to_string(), PlainValue::from("ana"));
    assert_eq!(exported, PlainValue::Object(expected));

    let code = script("console.print('pwned')");
    let err = host.engine.load_json(code.path()).expect_err("code is not data");
    assert!(matches!(err, WardenError::IllegalToken { .. }));
    assert_eq!(host.console.text(), "");
}

#[cfg(unix)]
#[test]
fn trusted_scripts_can_run_processes() {
    let mut host = host();
    let out = host
        .engine
        .eval_string("let r = process_exec.run('echo', ['ok']); r.stdout")
        .expect("process");
    assert_eq!(out, Value::str("ok\n"));
}
