use std::sync::{Arc, Mutex};

use super::*;
use crate::bytecode::Kind;

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn lines(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn record(log: &Log, line: impl Into<String>) {
    log.lock().unwrap().push(line.into());
}

fn pop_int() -> i32 {
    let Value::Int(v) = accessors::pop(Kind::Int).unwrap() else {
        unreachable!("expected an int in storage")
    };
    v
}

/// Entry shaped like a rewritten root method with one restore point: local `i`
/// survives the suspension through int storage.
fn counting_entry(log: Log) -> impl FnMut() -> Result<(), Throw> + Send + 'static {
    move || {
        let coro = registry::current().unwrap();
        let resumed = accessors::pop_state()? == 0;
        let i = if resumed {
            let i = pop_int();
            // receiver of the yield call
            accessors::pop(Kind::Ref)?;
            i
        } else {
            record(&log, "i = 5");
            5
        };
        coro.yield_now()?;
        if accessors::is_yielding() {
            accessors::push(Value::Int(i))?;
            accessors::push_state(0)?;
            accessors::push_companion(None)?;
            return Ok(());
        }
        record(&log, format!("done i = {}", i));
        Ok(())
    }
}

#[test]
fn test_lifecycle_round_trip() {
    let log = log();
    let coro = Coro::init_suspended(counting_entry(log.clone()));
    assert_eq!(coro.status(), Status::Initial);

    coro.start().unwrap();
    assert_eq!(coro.status(), Status::Suspended);
    assert_eq!(lines(&log), vec!["i = 5"]);
    assert_eq!(coro.saved_states(), vec![0]);
    assert!(!registry::exists());

    coro.resume().unwrap();
    assert_eq!(coro.status(), Status::Terminal);
    assert_eq!(lines(&log), vec!["i = 5", "done i = 5"]);
    assert!(coro.saved_states().is_empty());
    assert!(!coro.has_saved_values());

    let Err(Throw::Fault(Error::Invariant(invariant))) = coro.resume() else {
        unreachable!("resuming a finished coroutine must fail")
    };
    assert_eq!(invariant, Invariant::ResumeTerminal { id: coro.id() });
}

#[test]
fn test_double_yield_is_rejected() {
    let coro = Coro::init_suspended(|| {
        let coro = registry::current().unwrap();
        coro.yield_now()?;
        coro.yield_now()?;
        Ok(())
    });
    let err = coro.start().unwrap_err();
    assert_eq!(err.fault_kind(), Some(ErrorKind::RuntimeInvariant));
    assert!(matches!(
        err,
        Throw::Fault(Error::Invariant(Invariant::DoubleYield { .. }))
    ));
    assert!(coro.is_done());
}

#[test]
fn test_resume_from_inside_itself_is_rejected() {
    let observed = log();
    let sink = observed.clone();
    let coro = Coro::init_suspended(move || {
        let me = registry::current().unwrap();
        match me.resume() {
            Err(Throw::Fault(Error::Invariant(Invariant::AlreadyRunning { .. }))) => {
                record(&sink, "rejected")
            }
            _ => record(&sink, "accepted"),
        }
        Ok(())
    });
    coro.start().unwrap();
    assert_eq!(lines(&observed), vec!["rejected"]);
}

#[test]
fn test_yield_outside_running_coroutine() {
    let coro = Coro::init_suspended(|| Ok(()));
    assert_eq!(
        coro.yield_now(),
        Err(Invariant::NotRunning { id: coro.id() })
    );
}

#[test]
fn test_accessors_require_active_coroutine() {
    assert!(!accessors::exists());
    assert_eq!(accessors::pop_state(), Err(Invariant::NoActiveCoroutine));
    assert_eq!(
        accessors::push(Value::Int(1)),
        Err(Invariant::NoActiveCoroutine)
    );
    assert!(!accessors::is_yielding());
}

#[test]
fn test_nested_coroutines_keep_separate_registry_entries() {
    let log = log();
    let inner_log = log.clone();
    let inner = Coro::init_suspended(move || {
        let me = registry::current().unwrap();
        record(&inner_log, format!("inner depth {}", registry::depth()));
        me.yield_now()?;
        if me.is_yielding() {
            accessors::push_companion(None)?;
            return Ok(());
        }
        Ok(())
    });

    let outer_log = log.clone();
    let inner_handle = inner.clone();
    let outer = Coro::init_suspended(move || {
        let me = registry::current().unwrap();
        inner_handle.start()?;
        let current = registry::current().unwrap();
        record(
            &outer_log,
            format!("back in outer: {}", Arc::ptr_eq(&current, &me)),
        );
        Ok(())
    });

    outer.start().unwrap();
    assert_eq!(lines(&log), vec!["inner depth 2", "back in outer: true"]);
    assert!(outer.is_done());
    assert_eq!(inner.status(), Status::Suspended);
    // outer's storage was never touched by the inner coroutine
    assert!(!outer.has_saved_values());
}

#[test]
fn test_deferred_continuation_runs_after_unwind() {
    let log = log();
    let entry_log = log.clone();
    let coro = Coro::init_suspended(move || {
        let me = registry::current().unwrap();
        if accessors::pop_state()? == 0 {
            accessors::pop(Kind::Ref)?;
        }
        let cont_log = entry_log.clone();
        let target = me.clone();
        me.yield_with(Box::new(move || {
            record(
                &cont_log,
                format!("continuation, active = {}", registry::exists()),
            );
            target.resume()
        }))?;
        if me.is_yielding() {
            record(&entry_log, "suspending");
            accessors::push_state(0)?;
            accessors::push_companion(None)?;
            return Ok(());
        }
        record(&entry_log, "finished");
        Ok(())
    });

    coro.start().unwrap();
    assert_eq!(
        lines(&log),
        vec!["suspending", "continuation, active = false", "finished"]
    );
    assert!(coro.is_done());
}

#[test]
fn test_exception_from_entry_terminates() {
    let coro = Coro::init_suspended(|| Err(Throw::Exception(Obj::instance("demo/Boom"))));
    let err = coro.start().unwrap_err();
    assert_eq!(err.exception().unwrap().class_name(), "demo/Boom");
    assert!(coro.is_done());
}

#[test]
fn test_staging_commit_and_companion_discard() {
    let checks = log();
    let sink = checks.clone();
    let coro = Coro::init_suspended(move || {
        let me = registry::current().unwrap();
        accessors::begin_staging()?;
        accessors::stage(Value::Int(10))?;
        accessors::stage(Value::string("arg"))?;
        accessors::stage(Value::Int(20))?;
        record(&sink, format!("{:?}", accessors::peek_staged(Kind::Int, 0)?));
        record(&sink, format!("{:?}", accessors::peek_staged(Kind::Int, 1)?));
        record(&sink, format!("{:?}", accessors::peek_staged(Kind::Ref, 0)?));
        assert!(accessors::peek_staged(Kind::Int, 2).is_err());

        // a callee below the unpatchable call suspended and left its companion
        accessors::push_companion(Some(Obj::instance("demo/Callee")))?;
        accessors::discard_companion()?;
        // nothing to discard the second time
        accessors::discard_companion()?;
        accessors::commit_staging()?;
        assert_eq!(accessors::end_staging(), Err(Invariant::NoStagingFrame));

        record(&sink, format!("{:?}", accessors::pop(Kind::Int)?));
        record(&sink, format!("{}", accessors::pop(Kind::Ref)?));
        record(&sink, format!("{:?}", accessors::pop(Kind::Int)?));
        assert!(!me.has_saved_values());
        Ok(())
    });
    coro.start().unwrap();
    assert_eq!(lines(&checks), vec!["20", "10", "\"arg\"", "20", "arg", "10"]);
}

#[test]
fn test_own_reference_is_restored_as_same_coroutine() {
    let coro = Coro::init_suspended(move || {
        let me = registry::current().unwrap();
        accessors::push(Value::obj(Obj::coro(me.clone())))?;
        let restored = accessors::pop(Kind::Ref)?;
        assert_eq!(restored, Value::obj(Obj::coro(me)));
        Ok(())
    });
    coro.start().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispatcher_resumes_on_pool_thread() {
    let log = log();
    let coro = Coro::init_suspended(counting_entry(log.clone()));
    let dispatcher = Dispatcher::current();

    dispatcher.resume(coro.clone()).await.unwrap();
    assert_eq!(coro.status(), Status::Suspended);

    dispatcher.post(coro.clone()).await.unwrap().unwrap();
    assert!(coro.is_done());
    assert_eq!(lines(&log), vec!["i = 5", "done i = 5"]);
}
