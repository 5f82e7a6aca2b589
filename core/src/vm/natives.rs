//! Built-in native methods.

use std::collections::HashMap;
use std::sync::Arc;

use super::{fault, Native, NativeResult, Vm};
use crate::bytecode::{Kind, MethodId, THROWABLE};
use crate::error::Invariant;
use crate::runtime::{abi, accessors, registry, Coro, Obj, ObjRef, Throw, Value};

const STRING: &str = "java/lang/String";
const CONSOLE: &str = "corofy/Console";

#[derive(Default)]
struct Table(HashMap<MethodId, Native>);

impl Table {
    fn add<F>(&mut self, id: MethodId, native: F)
    where
        F: Fn(&Vm, &[Value]) -> NativeResult + Send + Sync + 'static,
    {
        self.0.insert(id, Arc::new(native));
    }
}

pub(super) fn builtins() -> HashMap<MethodId, Native> {
    let mut table = Table::default();
    storage(&mut table);
    coroutines(&mut table);
    library(&mut table);
    table.0
}

/* ===================== Argument Helpers ===================== */

fn arg(args: &[Value], i: usize) -> Result<&Value, Throw> {
    args.get(i)
        .ok_or_else(|| fault(format!("missing argument {}", i)))
}

fn int_arg(args: &[Value], i: usize) -> Result<i32, Throw> {
    match arg(args, i)? {
        Value::Int(v) => Ok(*v),
        other => Err(fault(format!("expected int argument, found {:?}", other))),
    }
}

fn ref_arg(args: &[Value], i: usize) -> Result<Option<ObjRef>, Throw> {
    match arg(args, i)? {
        Value::Ref(r) => Ok(r.clone()),
        other => Err(fault(format!("expected reference argument, found {:?}", other))),
    }
}

fn non_null(vm: &Vm, args: &[Value], i: usize) -> Result<ObjRef, Throw> {
    ref_arg(args, i)?.ok_or_else(|| {
        vm.exception("java/lang/NullPointerException", &format!("argument {} is null", i))
    })
}

fn coro_arg(vm: &Vm, args: &[Value], i: usize) -> Result<Arc<Coro>, Throw> {
    let obj = non_null(vm, args, i)?;
    obj.as_coro()
        .cloned()
        .ok_or_else(|| fault(format!("{} is not a coroutine", obj.class_name())))
}

fn str_arg(vm: &Vm, args: &[Value], i: usize) -> Result<String, Throw> {
    let obj = non_null(vm, args, i)?;
    obj.as_str()
        .map(str::to_string)
        .ok_or_else(|| fault(format!("{} is not a string", obj.class_name())))
}

fn boolean(b: bool) -> NativeResult {
    Ok(Some(Value::Int(i32::from(b))))
}

fn unit() -> NativeResult {
    Ok(None)
}

/// Text of a value as `println`/`valueOf` render it, `Z` rendering as a boolean.
fn text(desc: &str, value: &Value) -> String {
    match (desc, value) {
        ("Z", Value::Int(v)) => (*v != 0).to_string(),
        _ => value.to_string(),
    }
}

/* ===================== Storage Accessors ===================== */

fn storage(table: &mut Table) {
    table.add(abi::exists(), |_, _| boolean(accessors::exists()));
    table.add(abi::get(), |_, _| {
        Ok(Some(
            registry::current()
                .map(|coro| Value::obj(Obj::coro(coro)))
                .unwrap_or_else(Value::null),
        ))
    });
    table.add(abi::is_yielding(), |_, _| boolean(accessors::is_yielding()));
    table.add(abi::pop_state(), |_, _| {
        Ok(Some(Value::Int(accessors::pop_state()?)))
    });
    table.add(abi::push_state(), |_, args| {
        accessors::push_state(int_arg(args, 0)?)?;
        unit()
    });

    for kind in Kind::ALL {
        table.add(abi::push(kind), |_, args| {
            accessors::push(arg(args, 0)?.clone())?;
            unit()
        });
        table.add(abi::pop(kind), move |_, _| Ok(Some(accessors::pop(kind)?)));
        table.add(abi::stage(kind), |_, args| {
            accessors::stage(arg(args, 0)?.clone())?;
            unit()
        });
        table.add(abi::peek_staged(kind), move |_, args| {
            let depth = int_arg(args, 0)?;
            let depth = usize::try_from(depth)
                .map_err(|_| Invariant::StagingUnderflow { kind, depth: 0 })?;
            Ok(Some(accessors::peek_staged(kind, depth)?))
        });
    }

    table.add(abi::push_companion(), |_, args| {
        accessors::push_companion(ref_arg(args, 0)?)?;
        unit()
    });
    table.add(abi::discard_companion(), |_, _| {
        accessors::discard_companion()?;
        unit()
    });
    table.add(abi::begin_staging(), |_, _| {
        accessors::begin_staging()?;
        unit()
    });
    table.add(abi::commit_staging(), |_, _| {
        accessors::commit_staging()?;
        unit()
    });
    table.add(abi::end_staging(), |_, _| {
        accessors::end_staging()?;
        unit()
    });
    table.add(abi::invalid_dispatch(), |vm, args| {
        let method = str_arg(vm, args, 0)?;
        Err(Invariant::InvalidDispatch { method }.into())
    });
}

/* ===================== Coroutine Surface ===================== */

fn coroutines(table: &mut Table) {
    table.add(abi::init_suspended(), |vm, args| {
        let runnable = non_null(vm, args, 0)?;
        Ok(Some(Value::obj(Obj::coro(vm.coroutine(runnable)))))
    });
    table.add(abi::start(), |vm, args| {
        coro_arg(vm, args, 0)?.start()?;
        unit()
    });
    table.add(abi::resume(), |vm, args| {
        coro_arg(vm, args, 0)?.resume()?;
        unit()
    });
    table.add(abi::yield_now(), |vm, args| {
        coro_arg(vm, args, 0)?.yield_now()?;
        unit()
    });
    table.add(abi::yield_with(), |vm, args| {
        let coro = coro_arg(vm, args, 0)?;
        match ref_arg(args, 1)? {
            Some(runnable) => {
                let vm = vm.clone();
                coro.yield_with(Box::new(move || vm.run_runnable(&runnable)))?;
            }
            // the resume path passes a null placeholder
            None => coro.yield_now()?,
        }
        unit()
    });
    table.add(abi::is_done(), |vm, args| boolean(coro_arg(vm, args, 0)?.is_done()));
}

/* ===================== Library ===================== */

fn library(table: &mut Table) {
    table.add(MethodId::new(crate::bytecode::OBJECT, "<init>", "()V"), |_, _| unit());
    table.add(
        MethodId::new(crate::bytecode::OBJECT, "toString", "()Ljava/lang/String;"),
        |vm, args| Ok(Some(Value::string(non_null(vm, args, 0)?.to_string()))),
    );

    table.add(MethodId::new(THROWABLE, "<init>", "()V"), |_, _| unit());
    table.add(
        MethodId::new(THROWABLE, "<init>", "(Ljava/lang/String;)V"),
        |vm, args| {
            let this = non_null(vm, args, 0)?;
            this.set_field("message", Value::Ref(ref_arg(args, 1)?));
            unit()
        },
    );
    table.add(
        MethodId::new(THROWABLE, "getMessage", "()Ljava/lang/String;"),
        |vm, args| {
            let this = non_null(vm, args, 0)?;
            Ok(Some(
                this.get_field("message", "Ljava/lang/String;")
                    .unwrap_or_else(Value::null),
            ))
        },
    );

    for desc in ["Ljava/lang/String;", "Ljava/lang/Object;", "I", "J", "F", "D", "Z"] {
        table.add(
            MethodId::new(CONSOLE, "println", format!("({})V", desc)),
            move |vm, args| {
                vm.console().println(text(desc, arg(args, 0)?));
                unit()
            },
        );
        if desc != "Ljava/lang/String;" {
            table.add(
                MethodId::new(STRING, "valueOf", format!("({})Ljava/lang/String;", desc)),
                move |_, args| Ok(Some(Value::string(text(desc, arg(args, 0)?)))),
            );
        }
    }

    table.add(
        MethodId::new(STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;"),
        |vm, args| {
            let mut s = str_arg(vm, args, 0)?;
            s.push_str(&str_arg(vm, args, 1)?);
            Ok(Some(Value::string(s)))
        },
    );
    table.add(
        MethodId::new(STRING, "equals", "(Ljava/lang/Object;)Z"),
        |vm, args| {
            let this = str_arg(vm, args, 0)?;
            let other = ref_arg(args, 1)?;
            boolean(other.is_some_and(|o| o.as_str() == Some(this.as_str())))
        },
    );
    table.add(MethodId::new(STRING, "length", "()I"), |vm, args| {
        Ok(Some(Value::Int(str_arg(vm, args, 0)?.chars().count() as i32)))
    });
}
