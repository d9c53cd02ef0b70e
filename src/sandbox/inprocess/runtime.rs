//! One artifact run inside an embedded Python VM.
//!
//! Each run builds a fresh interpreter on the calling thread, so no state
//! survives between artifacts. Hidden builtins are deleted before the
//! artifact's code object runs and `sys.stdout`/`sys.stderr` are replaced
//! by sinks writing into the caller's bounded buffers.

use std::sync::{Arc, Mutex};

use rustpython::vm::builtins::{PyBaseExceptionRef, PyStrRef};
use rustpython::vm::compiler::Mode;
use rustpython::vm::signal::{UserSignal, UserSignalReceiver};
use rustpython::vm::{AsObject, PyObjectRef, PyResult, Settings, VirtualMachine};
use rustpython::InterpreterConfig;

use super::capabilities::{self, Exposure};
use crate::sandbox::capture::BoundedOutput;

pub(super) type SharedOutput = Arc<Mutex<BoundedOutput>>;

/// How the artifact's top-level code finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ProgramExit {
    Completed,
    /// Uncaught exception, rendered as `Kind: message`.
    Raised(String),
    /// The runtime could not be prepared. The artifact never ran.
    Setup(String),
}

/// File-like object whose `write` is a native function.
const SINK_CLASS: &str = "\
class Sink:
    def __init__(self, write):
        self.write = write

    def flush(self):
        pass
";

/// Runs `source` to completion in a new interpreter.
///
/// Blocks the calling thread. Anything sent on the paired
/// `UserSignalSender` runs between bytecode instructions.
pub(super) fn run_program(
    source: &str,
    stdout: SharedOutput,
    stderr: SharedOutput,
    interrupts: UserSignalReceiver,
) -> ProgramExit {
    let interpreter = InterpreterConfig::new()
        .settings(settings())
        .init_stdlib()
        .init_hook(Box::new(move |vm| vm.set_user_signal_channel(interrupts)))
        .interpreter();

    interpreter.enter(|vm| {
        if let Err(exc) = prepare(vm, stdout, stderr) {
            return ProgramExit::Setup(describe(vm, &exc));
        }
        execute(vm, source)
    })
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.ignore_environment = true;
    settings.import_site = false;
    settings
}

fn prepare(vm: &VirtualMachine, stdout: SharedOutput, stderr: SharedOutput) -> PyResult<()> {
    let builtins = vm.builtins.dict();
    for name in capabilities::with_exposure(Exposure::Hidden) {
        // exit/quit/help come from `site`, which never loads
        if builtins.contains_key(name, vm) {
            builtins.del_item(name, vm)?;
        }
    }

    let scope = vm.new_scope_with_builtins();
    let code = vm
        .compile(SINK_CLASS, Mode::Exec, "<sink>".to_owned())
        .map_err(|err| vm.new_runtime_error(err.to_string()))?;
    vm.run_code_obj(code, scope.clone())?;
    let sink = scope.globals.get_item("Sink", vm)?;

    let sys = vm.sys_module.as_object();
    sys.set_attr("stdout", sink.call((writer(vm, stdout),), vm)?, vm)?;
    sys.set_attr("stderr", sink.call((writer(vm, stderr),), vm)?, vm)?;
    Ok(())
}

fn writer(vm: &VirtualMachine, out: SharedOutput) -> PyObjectRef {
    vm.new_function("write", move |text: PyStrRef| -> usize {
        let text = text.as_str();
        if let Ok(mut out) = out.lock() {
            out.push_str(text);
        }
        text.chars().count()
    })
    .into()
}

fn execute(vm: &VirtualMachine, source: &str) -> ProgramExit {
    let code = match vm.compile(source, Mode::Exec, "<artifact>".to_owned()) {
        Ok(code) => code,
        Err(err) => return ProgramExit::Raised(format!("SyntaxError: {err}")),
    };

    let scope = vm.new_scope_with_builtins();
    if let Err(exc) = scope
        .globals
        .set_item("__name__", vm.ctx.new_str("__main__").into(), vm)
    {
        return ProgramExit::Setup(describe(vm, &exc));
    }

    match vm.run_code_obj(code, scope) {
        Ok(_) => ProgramExit::Completed,
        Err(exc) if is_clean_exit(vm, &exc) => ProgramExit::Completed,
        Err(exc) => ProgramExit::Raised(describe(vm, &exc)),
    }
}

fn describe(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> String {
    let kind = (*exc.class().name()).to_owned();
    let message = exc
        .as_object()
        .str(vm)
        .map(|s| s.as_str().to_owned())
        .unwrap_or_default();
    if message.is_empty() {
        kind
    } else {
        format!("{kind}: {message}")
    }
}

/// `sys.exit()`, `sys.exit(None)` and `sys.exit(0)` end the program normally.
fn is_clean_exit(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> bool {
    if !exc.fast_isinstance(vm.ctx.exceptions.system_exit) {
        return false;
    }
    match exc.args().as_slice() {
        [] => true,
        [code] => {
            vm.is_none(code)
                || code
                    .try_index(vm)
                    .ok()
                    .and_then(|i| i.try_to_primitive::<i64>(vm).ok())
                    == Some(0)
        }
        _ => false,
    }
}

/// Signal that raises `KeyboardInterrupt` in the running artifact.
pub(super) fn interrupt() -> UserSignal {
    Box::new(|vm| {
        Err(vm.new_exception_msg(
            vm.ctx.exceptions.keyboard_interrupt.to_owned(),
            "execution deadline exceeded".to_owned(),
        ))
    })
}
