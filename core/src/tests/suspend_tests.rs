//! Tests for suspension and resumption of rewritten code
//!
//! Single and multiple restore points, unpatchable calls, deferred continuations

use super::helpers::{instrumented, instrumented_vm, plain_vm, run_of};
use crate::bytecode::{InvokeKind, MethodId};
use crate::error::{Error, ErrorKind, Invariant};
use crate::runtime::{Status, Throw, Value};

const MAIN: &str = r#"
class demo/Main implements java/lang/Runnable {
    method run ()V locals 2 {
        .await work
        iconst 5
        istore 1
        ldc "i = "
        iload 1
        invokestatic java/lang/String.valueOf (I)Ljava/lang/String;
        invokevirtual java/lang/String.concat (Ljava/lang/String;)Ljava/lang/String;
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        aload 0
        invokevirtual demo/Main.work ()V
        ldc "done i = "
        iload 1
        invokestatic java/lang/String.valueOf (I)Ljava/lang/String;
        invokevirtual java/lang/String.concat (Ljava/lang/String;)Ljava/lang/String;
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        return
    }

    method work ()V {
        .await yield owner=corofy/Coro
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.yield ()V
        return
    }
}
"#;

#[test]
fn test_local_survives_suspension() {
    let (vm, report) = instrumented_vm(MAIN);
    assert_eq!(report.modified_classes(), 1);

    let coro = vm.spawn(&run_of("demo/Main")).unwrap();
    coro.start().unwrap();
    assert_eq!(coro.status(), Status::Suspended);
    // post-yield code has not run
    assert_eq!(vm.console().lines(), vec!["i = 5"]);
    assert_eq!(coro.saved_states(), vec![0, 0]);

    coro.resume().unwrap();
    assert!(coro.is_done());
    assert_eq!(vm.console().lines(), vec!["i = 5", "done i = 5"]);
    assert!(coro.saved_states().is_empty());
    assert!(!coro.has_saved_values());
}

#[test]
fn test_resume_after_completion_is_an_invariant_violation() {
    let (vm, _) = instrumented_vm(MAIN);
    let coro = vm.spawn(&run_of("demo/Main")).unwrap();
    coro.start().unwrap();
    coro.resume().unwrap();

    let err = coro.resume().unwrap_err();
    assert_eq!(err.fault_kind(), Some(ErrorKind::RuntimeInvariant));
    let Throw::Fault(Error::Invariant(invariant)) = err else {
        unreachable!("expected an invariant violation")
    };
    assert_eq!(invariant, Invariant::ResumeTerminal { id: coro.id() });
}

#[test]
fn test_each_saved_index_resumes_its_own_site() {
    let source = r#"
class demo/Steps {
    method static run ()V {
        .await yield owner=corofy/Coro
        ldc "one"
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.yield ()V
        ldc "two"
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.yield ()V
        ldc "three"
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.yield ()V
        ldc "four"
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        return
    }
}
"#;
    let (vm, report) = instrumented_vm(source);
    let steps = report.class("demo/Steps").unwrap();
    assert_eq!(steps.methods[0].restore_point_calls, 3);
    assert!(steps.methods[0].root_entry);

    let coro = vm.spawn(&run_of("demo/Steps")).unwrap();
    coro.start().unwrap();
    assert_eq!(coro.saved_states(), vec![0]);
    assert_eq!(vm.console().take(), vec!["one"]);

    coro.resume().unwrap();
    assert_eq!(coro.saved_states(), vec![1]);
    assert_eq!(vm.console().take(), vec!["two"]);

    coro.resume().unwrap();
    assert_eq!(coro.saved_states(), vec![2]);
    assert_eq!(vm.console().take(), vec!["three"]);

    coro.resume().unwrap();
    assert!(coro.is_done());
    assert_eq!(vm.console().take(), vec!["four"]);
    assert!(!coro.has_saved_values());
}

#[test]
fn test_rewritten_code_without_yield_behaves_as_written() {
    let source = r#"
class demo/Calc implements java/lang/Runnable {
    method run ()V locals 2 {
        .await twice
        iconst 20
        istore 1
        iload 1
        aload 0
        iload 1
        invokevirtual demo/Calc.twice (I)I
        iadd
        invokestatic corofy/Console.println (I)V
        return
    }

    method twice (I)I {
        iload 1
        iconst 2
        imul
        ireturn
    }
}
"#;
    let run = run_of("demo/Calc");

    let plain = plain_vm(source);
    let receiver = plain.instantiate("demo/Calc").unwrap();
    plain.invoke(InvokeKind::Virtual, &run, vec![Value::obj(receiver)]).unwrap();

    let (vm, _) = instrumented_vm(source);
    let receiver = vm.instantiate("demo/Calc").unwrap();
    vm.invoke(InvokeKind::Virtual, &run, vec![Value::obj(receiver)]).unwrap();
    assert_eq!(vm.console().take(), plain.console().lines());

    let coro = vm.spawn(&run).unwrap();
    coro.start().unwrap();
    assert!(coro.is_done());
    assert_eq!(vm.console().lines(), plain.console().lines());
    assert_eq!(plain.console().lines(), vec!["60"]);
}

#[test]
fn test_owner_and_descriptor_narrow_matches() {
    let source = r#"
class demo/Lib {
    method static work (I)V {
        return
    }

    method static work (J)V {
        return
    }
}

class demo/Other {
    method static work (I)V {
        return
    }
}

class demo/Caller {
    method static precise ()V {
        .await work owner=demo/Lib desc=(I)V
        iconst 1
        invokestatic demo/Lib.work (I)V
        lconst 1
        invokestatic demo/Lib.work (J)V
        iconst 1
        invokestatic demo/Other.work (I)V
        return
    }

    method static loose ()V {
        .await work
        iconst 1
        invokestatic demo/Lib.work (I)V
        lconst 1
        invokestatic demo/Lib.work (J)V
        iconst 1
        invokestatic demo/Other.work (I)V
        return
    }
}
"#;
    let (_, report) = instrumented(source);
    let caller = report.class("demo/Caller").unwrap();
    let precise = caller
        .methods
        .iter()
        .find(|m| m.method == "demo/Caller.precise()V")
        .unwrap();
    assert_eq!(precise.restore_point_calls, 1);
    assert_eq!(precise.restore_points, vec!["demo/Lib.work(I)V"]);

    let loose = caller
        .methods
        .iter()
        .find(|m| m.method == "demo/Caller.loose()V")
        .unwrap();
    assert_eq!(loose.restore_point_calls, 3);
    assert_eq!(
        loose.restore_points,
        vec!["demo/Lib.work(I)V", "demo/Lib.work(J)V", "demo/Other.work(I)V"]
    );
    assert!(!report.class("demo/Lib").unwrap().modified);
}

#[test]
fn test_wide_locals_and_stack_below_survive() {
    let source = r#"
class demo/Wide implements java/lang/Runnable {
    method run ()V locals 6 {
        .await work
        lconst 123456789012
        lstore 1
        dconst 2.5
        dstore 3
        fconst 1.5
        fstore 5
        iconst 40
        aload 0
        invokevirtual demo/Wide.work ()I
        iadd
        invokestatic corofy/Console.println (I)V
        lload 1
        invokestatic corofy/Console.println (J)V
        dload 3
        invokestatic corofy/Console.println (D)V
        fload 5
        invokestatic corofy/Console.println (F)V
        return
    }

    method work ()I {
        .await yield owner=corofy/Coro
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.yield ()V
        iconst 2
        ireturn
    }
}
"#;
    let (vm, _) = instrumented_vm(source);
    let coro = vm.spawn(&run_of("demo/Wide")).unwrap();
    coro.start().unwrap();
    assert_eq!(coro.status(), Status::Suspended);
    assert!(vm.console().lines().is_empty());

    coro.resume().unwrap();
    assert!(coro.is_done());
    assert_eq!(
        vm.console().lines(),
        vec!["42", "123456789012", "2.5", "1.5"]
    );
    assert!(!coro.has_saved_values());
}

#[test]
fn test_unpatchable_call_gets_its_arguments_back() {
    let source = r#"
class demo/Lib {
    field id I

    method relay (Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;D)V {
        aload 0
        getfield demo/Lib.id I
        invokestatic corofy/Console.println (I)V
        aload 1
        invokestatic corofy/Console.println (Ljava/lang/Object;)V
        aload 2
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        aload 3
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        dload 4
        invokestatic corofy/Console.println (D)V
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.yield ()V
        return
    }
}

class demo/Host implements java/lang/Runnable {
    method run ()V locals 2 {
        .await relay owner=demo/Lib unpatchable
        new demo/Lib
        astore 1
        aload 1
        iconst 7
        putfield demo/Lib.id I
        iconst 40
        aload 1
        aconst_null
        ldc "b"
        ldc "c"
        dconst 2.5
        invokevirtual demo/Lib.relay (Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;D)V
        invokestatic corofy/Console.println (I)V
        ldc "after"
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        return
    }
}
"#;
    let (vm, report) = instrumented_vm(source);
    let host = report.class("demo/Host").unwrap();
    assert_eq!(
        host.methods[0].unpatchable,
        vec!["demo/Lib.relay(Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;D)V"]
    );
    assert!(!report.class("demo/Lib").unwrap().modified);

    let coro = vm.spawn(&run_of("demo/Host")).unwrap();
    coro.start().unwrap();
    assert_eq!(coro.status(), Status::Suspended);
    let first = vec!["7", "null", "b", "c", "2.5"];
    assert_eq!(vm.console().lines(), first);

    coro.resume().unwrap();
    assert!(coro.is_done());
    // the unpatchable prefix runs again with the same receiver and arguments
    let mut expected = first.clone();
    expected.extend(first);
    expected.extend(["40", "after"]);
    assert_eq!(vm.console().lines(), expected);
    assert!(!coro.has_saved_values());
}

#[test]
fn test_deferred_continuation_can_resume_synchronously() {
    let source = r#"
class demo/Again implements java/lang/Runnable {
    field coro Lcorofy/Coro;

    method run ()V {
        aload 0
        getfield demo/Again.coro Lcorofy/Coro;
        invokevirtual corofy/Coro.resume ()V
        return
    }
}

class demo/Deferred implements java/lang/Runnable {
    method run ()V locals 2 {
        .await yield owner=corofy/Coro
        ldc "before"
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        new demo/Again
        astore 1
        aload 1
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        putfield demo/Again.coro Lcorofy/Coro;
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        aload 1
        invokevirtual corofy/Coro.yield (Ljava/lang/Runnable;)V
        ldc "after"
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        return
    }
}
"#;
    let (vm, report) = instrumented_vm(source);
    assert!(!report.class("demo/Again").unwrap().modified);

    let coro = vm.spawn(&run_of("demo/Deferred")).unwrap();
    coro.start().unwrap();
    // the continuation resumed the coroutine before start() returned
    assert!(coro.is_done());
    assert_eq!(vm.console().lines(), vec!["before", "after"]);
    assert!(coro.saved_states().is_empty());
}

#[test]
fn test_corrupt_state_index_is_reported() {
    let source = r#"
class demo/Corrupt implements java/lang/Runnable {
    method run ()V {
        iconst 9
        invokestatic corofy/Coro.pushState (I)V
        invokestatic demo/Corrupt.twice ()V
        return
    }

    method static twice ()V {
        .await yield owner=corofy/Coro
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.yield ()V
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.yield ()V
        return
    }
}
"#;
    let (vm, _) = instrumented_vm(source);
    let coro = vm.spawn(&run_of("demo/Corrupt")).unwrap();
    let err = coro.start().unwrap_err();
    let Throw::Fault(Error::Invariant(invariant)) = err else {
        unreachable!("expected an invariant violation")
    };
    assert_eq!(
        invariant,
        Invariant::InvalidDispatch {
            method: MethodId::new("demo/Corrupt", "twice", "()V").to_string()
        }
    );
    assert!(coro.is_done());
}

#[test]
fn test_api_misuse_fails_loudly() {
    let source = r#"
class demo/Misuse implements java/lang/Runnable {
    method run ()V {
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.resume ()V
        return
    }
}

class demo/Twice implements java/lang/Runnable {
    method run ()V {
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.yield ()V
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.yield ()V
        return
    }
}
"#;
    let vm = plain_vm(source);

    let coro = vm.spawn(&run_of("demo/Misuse")).unwrap();
    let Err(Throw::Fault(Error::Invariant(invariant))) = coro.start() else {
        unreachable!("resuming a running coroutine must fail")
    };
    assert_eq!(invariant, Invariant::AlreadyRunning { id: coro.id() });

    let coro = vm.spawn(&run_of("demo/Twice")).unwrap();
    let Err(Throw::Fault(Error::Invariant(invariant))) = coro.start() else {
        unreachable!("yielding twice must fail")
    };
    assert_eq!(invariant, Invariant::DoubleYield { id: coro.id() });
}
