//! Tests for resuming coroutines from a tokio blocking pool

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use super::helpers::{instrumented, run_of};
use crate::bytecode::MethodId;
use crate::runtime::Dispatcher;
use crate::vm::Vm;

const COUNTER: &str = r#"
class demo/Counter implements java/lang/Runnable {
    method run ()V locals 2 {
        .await tick
        iconst 0
        istore 1
      L0:
        iload 1
        iconst 3
        if_icmpge L1
        aload 0
        iload 1
        invokevirtual demo/Counter.tick (I)V
        iinc 1 1
        goto L0
      L1:
        ldc "finished"
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        return
    }

    method tick (I)V {
        .await yield owner=corofy/Coro
        iload 1
        invokestatic corofy/Console.println (I)V
        invokestatic demo/Host.mark ()V
        invokestatic corofy/Coro.get ()Lcorofy/Coro;
        invokevirtual corofy/Coro.yield ()V
        return
    }
}
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resume_on_pool_threads() {
    let threads: Arc<Mutex<HashSet<ThreadId>>> = Arc::new(Mutex::new(HashSet::new()));
    let seen = threads.clone();

    let (program, _) = instrumented(COUNTER);
    let vm = Vm::builder(program)
        .native(MethodId::new("demo/Host", "mark", "()V"), move |_, _| {
            seen.lock().unwrap().insert(std::thread::current().id());
            Ok(None)
        })
        .build();

    let coro = vm.spawn(&run_of("demo/Counter")).unwrap();
    let dispatcher = Dispatcher::current();

    let mut resumes = 0;
    while !coro.is_done() {
        dispatcher.resume(coro.clone()).await.unwrap();
        resumes += 1;
    }

    // one start, then one resume per tick
    assert_eq!(resumes, 4);
    assert_eq!(vm.console().lines(), vec!["0", "1", "2", "finished"]);
    assert!(!coro.has_saved_values());
    assert!(!threads.lock().unwrap().is_empty());
    assert!(!threads.lock().unwrap().contains(&std::thread::current().id()));
}

#[tokio::test]
async fn test_post_returns_resume_outcome() {
    let (program, _) = instrumented(COUNTER);
    let vm = Vm::builder(program)
        .native(MethodId::new("demo/Host", "mark", "()V"), |_, _| Ok(None))
        .build();
    let coro = vm.spawn(&run_of("demo/Counter")).unwrap();

    let dispatcher = Dispatcher::current();
    dispatcher.post(coro.clone()).await.unwrap().unwrap();
    assert_eq!(coro.saved_states(), vec![0, 0]);
    assert_eq!(vm.console().lines(), vec!["0"]);

    dispatcher.post(coro.clone()).await.unwrap().unwrap();
    assert_eq!(vm.console().lines(), vec!["0", "1"]);
}
