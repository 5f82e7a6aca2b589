//! Stack-machine interpreter hosting the runtime engine.
//!
//! Each invocation runs as one host call, so a suspension really unwinds through the
//! host stack: rewritten methods return early and `resume()` re-enters them from the
//! top. Natives implement the `corofy/Coro` surface and a handful of library methods.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::bytecode::{InvokeKind, Method, MethodDesc, MethodId, Program};
use crate::error::Error;
use crate::runtime::{Coro, Obj, ObjRef, Throw, Value};

mod console;
mod interp;
mod natives;

pub use console::Console;

#[cfg(test)]
mod tests;

pub type NativeResult = Result<Option<Value>, Throw>;

/// Host implementation of a method. Receives the receiver (if any) followed by the
/// arguments.
pub type Native = Arc<dyn Fn(&Vm, &[Value]) -> NativeResult + Send + Sync>;

/* ===================== VM ===================== */

/// Interpreter over a fixed program. Cheap to clone; clones share statics and the
/// console.
#[derive(Clone)]
pub struct Vm {
    program: Arc<Program>,
    natives: Arc<HashMap<MethodId, Native>>,
    statics: Arc<Mutex<HashMap<String, Value>>>,
    console: Console,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("classes", &self.program.classes.len())
            .field("natives", &self.natives.len())
            .finish()
    }
}

/// Method selected by resolution.
enum Target<'a> {
    Code(&'a Method),
    Native(Native),
}

impl Vm {
    /// VM with the built-in natives and a silent console.
    pub fn new(program: Program) -> Self {
        Self::builder(program).build()
    }

    pub fn builder(program: Program) -> VmBuilder {
        VmBuilder {
            program,
            natives: natives::builtins(),
            console: Console::default(),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    fn statics(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.statics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn get_static(&self, key: &str, desc: &str) -> Value {
        self.statics()
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::default_for(desc))
    }

    pub(crate) fn put_static(&self, key: String, value: Value) {
        self.statics().insert(key, value);
    }

    /* ===================== Invocation ===================== */

    /// Invoke `id`. For instance calls `args[0]` is the receiver.
    pub fn invoke(&self, kind: InvokeKind, id: &MethodId, args: Vec<Value>) -> NativeResult {
        let receiver_class = match (kind.has_receiver(), args.first()) {
            (false, _) => None,
            (true, Some(Value::Ref(Some(obj)))) => Some(obj.class_name().to_string()),
            (true, Some(Value::Ref(None))) => {
                return Err(self.exception(
                    "java/lang/NullPointerException",
                    &format!("cannot invoke {} on null", id),
                ))
            }
            (true, _) => return Err(fault(format!("missing receiver for {}", id))),
        };
        trace!(method = %id, "invoke");
        match self.resolve(kind, id, receiver_class.as_deref())? {
            Target::Code(method) => self.execute(method, args),
            Target::Native(native) => native(self, &args),
        }
    }

    /// Virtual calls start the lookup at the receiver's class, everything else at the
    /// named owner; both walk up the superclass chain.
    fn resolve(&self, kind: InvokeKind, id: &MethodId, receiver: Option<&str>) -> Result<Target<'_>, Throw> {
        let start = match kind {
            InvokeKind::Virtual | InvokeKind::Interface => receiver.unwrap_or(&id.owner),
            InvokeKind::Static | InvokeKind::Special => &id.owner,
        };
        for class in self.program.superclass_chain(start) {
            if let Some(method) = self
                .program
                .class(&class)
                .and_then(|c| c.method(&id.name, &id.desc))
            {
                if method.is_static != (kind == InvokeKind::Static) {
                    return Err(fault(format!("{} does not match the kind of {}", kind.mnemonic(), id)));
                }
                return Ok(Target::Code(method));
            }
            let key = MethodId::new(class, id.name.clone(), id.desc.clone());
            if let Some(native) = self.natives.get(&key) {
                return Ok(Target::Native(native.clone()));
            }
        }
        self.natives
            .get(id)
            .cloned()
            .map(Target::Native)
            .ok_or_else(|| fault(format!("no method {}", id)))
    }

    /// Create an application exception of `class` carrying `message`.
    pub fn exception(&self, class: &str, message: &str) -> Throw {
        let obj = Obj::instance(class);
        obj.set_field("message", Value::string(message));
        Throw::Exception(obj)
    }

    /// Run `runnable.run()`.
    pub fn run_runnable(&self, runnable: &ObjRef) -> Result<(), Throw> {
        let run = MethodId::new(crate::runtime::abi::RUNNABLE, "run", "()V");
        self.invoke(InvokeKind::Interface, &run, vec![Value::obj(runnable.clone())])
            .map(|_| ())
    }

    /* ===================== Coroutines ===================== */

    /// Coroutine whose entry calls `runnable.run()`.
    pub fn coroutine(&self, runnable: ObjRef) -> Arc<Coro> {
        let vm = self.clone();
        Coro::init_suspended(move || vm.run_runnable(&runnable))
    }

    /// Coroutine whose entry is the no-argument method `entry`.
    ///
    /// Static entries are invoked directly. For instance entries, a fresh object of the
    /// owning class is constructed first and the method is invoked on it.
    pub fn spawn(&self, entry: &MethodId) -> Result<Arc<Coro>, Throw> {
        let method = self
            .program
            .method(entry)
            .ok_or_else(|| fault(format!("no entry method {}", entry)))?;
        let desc = MethodDesc::parse(&entry.desc).map_err(|e| fault(e.0))?;
        if !desc.params.is_empty() {
            return Err(fault(format!("entry {} must not take arguments", entry)));
        }

        let vm = self.clone();
        let id = entry.clone();
        if method.is_static {
            debug!(entry = %id, "spawning static entry");
            return Ok(Coro::init_suspended(move || {
                vm.invoke(InvokeKind::Static, &id, Vec::new()).map(|_| ())
            }));
        }

        let receiver = self.instantiate(&entry.owner)?;
        debug!(entry = %id, "spawning instance entry");
        Ok(Coro::init_suspended(move || {
            vm.invoke(InvokeKind::Virtual, &id, vec![Value::obj(receiver.clone())])
                .map(|_| ())
        }))
    }

    /// New instance of `class`, initialized by its no-argument constructor if it has one.
    pub fn instantiate(&self, class: &str) -> Result<ObjRef, Throw> {
        let obj = Obj::instance(class);
        let init = MethodId::new(class, "<init>", "()V");
        if self.program.method(&init).is_some() {
            self.invoke(InvokeKind::Special, &init, vec![Value::obj(obj.clone())])?;
        }
        Ok(obj)
    }
}

/* ===================== Builder ===================== */

pub struct VmBuilder {
    program: Program,
    natives: HashMap<MethodId, Native>,
    console: Console,
}

impl VmBuilder {
    pub fn console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// Register (or replace) a native method.
    pub fn native<F>(mut self, id: MethodId, native: F) -> Self
    where
        F: Fn(&Vm, &[Value]) -> NativeResult + Send + Sync + 'static,
    {
        self.natives.insert(id, Arc::new(native));
        self
    }

    pub fn build(self) -> Vm {
        Vm {
            program: Arc::new(self.program),
            natives: Arc::new(self.natives),
            statics: Arc::new(Mutex::new(HashMap::new())),
            console: self.console,
        }
    }
}

pub(crate) fn fault(msg: impl Into<String>) -> Throw {
    Throw::Fault(Error::execution(msg))
}
