use super::*;
use crate::asm::assemble;
use crate::error::ErrorKind;

fn vm(source: &str) -> Vm {
    Vm::new(assemble(source).unwrap().program)
}

fn call_static(vm: &Vm, owner: &str, name: &str, desc: &str, args: Vec<Value>) -> NativeResult {
    vm.invoke(InvokeKind::Static, &MethodId::new(owner, name, desc), args)
}

#[test]
fn test_arithmetic_and_loops() {
    let source = r#"
class demo/Math {
    method static sum (I)I locals 3 {
        iconst 0
        istore 1
        iconst 1
        istore 2
      L0:
        iload 2
        iload 0
        if_icmpgt L1
        iload 1
        iload 2
        iadd
        istore 1
        iinc 2 1
        goto L0
      L1:
        iload 1
        ireturn
    }

    method static widen (I)J {
        iload 0
        i2l
        lconst 3
        lmul
        lreturn
    }
}
"#;
    let vm = vm(source);
    let sum = call_static(&vm, "demo/Math", "sum", "(I)I", vec![Value::Int(10)]).unwrap();
    assert_eq!(sum, Some(Value::Int(55)));
    let widened = call_static(&vm, "demo/Math", "widen", "(I)J", vec![Value::Int(7)]).unwrap();
    assert_eq!(widened, Some(Value::Long(21)));
}

#[test]
fn test_virtual_dispatch_fields_and_statics() {
    let source = r#"
class demo/Base {
    field n I
    field static created I

    method <init> ()V {
        aload 0
        invokespecial java/lang/Object.<init> ()V
        getstatic demo/Base.created I
        iconst 1
        iadd
        putstatic demo/Base.created I
        return
    }

    method name ()Ljava/lang/String; {
        ldc "base"
        areturn
    }
}

class demo/Derived extends demo/Base {
    method <init> ()V {
        aload 0
        invokespecial demo/Base.<init> ()V
        aload 0
        iconst 4
        putfield demo/Base.n I
        return
    }

    method name ()Ljava/lang/String; {
        ldc "derived "
        aload 0
        getfield demo/Base.n I
        invokestatic java/lang/String.valueOf (I)Ljava/lang/String;
        invokevirtual java/lang/String.concat (Ljava/lang/String;)Ljava/lang/String;
        areturn
    }

    method static describe ()V locals 1 {
        new demo/Derived
        dup
        invokespecial demo/Derived.<init> ()V
        astore 0
        aload 0
        invokevirtual demo/Base.name ()Ljava/lang/String;
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        getstatic demo/Base.created I
        invokestatic corofy/Console.println (I)V
        return
    }
}
"#;
    let vm = vm(source);
    call_static(&vm, "demo/Derived", "describe", "()V", Vec::new()).unwrap();
    assert_eq!(vm.console().lines(), vec!["derived 4", "1"]);
}

#[test]
fn test_exceptions_reach_matching_handler() {
    let source = r#"
class demo/Exc {
    method static divide (II)I locals 3 {
        .catch java/lang/IllegalStateException from L0 to L1 using L2
        .catch java/lang/ArithmeticException from L0 to L1 using L3
      L0:
        iload 0
        iload 1
        idiv
        ireturn
      L1:
      L2:
        pop
        iconst -1
        ireturn
      L3:
        astore 2
        aload 2
        invokevirtual java/lang/Throwable.getMessage ()Ljava/lang/String;
        invokestatic corofy/Console.println (Ljava/lang/String;)V
        iconst -2
        ireturn
    }

    method static fail ()V {
        new java/lang/IllegalStateException
        dup
        ldc "bad state"
        invokespecial java/lang/IllegalStateException.<init> (Ljava/lang/String;)V
        athrow
    }
}
"#;
    let vm = vm(source);
    let ok = call_static(&vm, "demo/Exc", "divide", "(II)I", vec![Value::Int(9), Value::Int(3)]);
    assert_eq!(ok.unwrap(), Some(Value::Int(3)));
    let caught = call_static(&vm, "demo/Exc", "divide", "(II)I", vec![Value::Int(1), Value::Int(0)]);
    assert_eq!(caught.unwrap(), Some(Value::Int(-2)));
    assert_eq!(vm.console().lines(), vec!["/ by zero"]);

    let thrown = call_static(&vm, "demo/Exc", "fail", "()V", Vec::new()).unwrap_err();
    let exception = thrown.exception().unwrap();
    assert_eq!(exception.class_name(), "java/lang/IllegalStateException");
    assert_eq!(exception.to_string(), "java/lang/IllegalStateException: bad state");
}

#[test]
fn test_null_receiver_and_bad_cast_are_exceptions() {
    let source = r#"
class demo/Npe {
    method static len (Ljava/lang/String;)I {
        aload 0
        invokevirtual java/lang/String.length ()I
        ireturn
    }

    method static cast (Ljava/lang/Object;)V {
        aload 0
        checkcast demo/Npe
        pop
        return
    }
}
"#;
    let vm = vm(source);
    let desc = "(Ljava/lang/String;)I";
    assert_eq!(
        call_static(&vm, "demo/Npe", "len", desc, vec![Value::string("héllo")]).unwrap(),
        Some(Value::Int(5))
    );
    let npe = call_static(&vm, "demo/Npe", "len", desc, vec![Value::null()]).unwrap_err();
    assert_eq!(npe.exception().unwrap().class_name(), "java/lang/NullPointerException");

    let cce = call_static(
        &vm,
        "demo/Npe",
        "cast",
        "(Ljava/lang/Object;)V",
        vec![Value::string("x")],
    )
    .unwrap_err();
    assert_eq!(cce.exception().unwrap().class_name(), "java/lang/ClassCastException");
}

#[test]
fn test_faults_are_not_catchable() {
    let source = r#"
class demo/Fault {
    method static missing ()V {
        .catch any from L0 to L1 using L2
      L0:
        invokestatic demo/Nowhere.call ()V
        return
      L1:
      L2:
        pop
        return
    }
}
"#;
    let vm = vm(source);
    let err = call_static(&vm, "demo/Fault", "missing", "()V", Vec::new()).unwrap_err();
    assert!(err.exception().is_none());
    assert_eq!(err.fault_kind(), Some(ErrorKind::Execution));
}

#[test]
fn test_custom_native_and_arrays() {
    let source = r#"
class demo/Arr {
    method static fill ()I locals 1 {
        iconst 3
        newarray I
        astore 0
        aload 0
        iconst 2
        invokestatic demo/Host.seven ()I
        iastore
        aload 0
        iconst 2
        iaload
        aload 0
        arraylength
        iadd
        ireturn
    }

    method static overrun ()V {
        iconst 1
        newarray I
        iconst 1
        iaload
        pop
        return
    }
}
"#;
    let program = assemble(source).unwrap().program;
    let vm = Vm::builder(program)
        .native(MethodId::new("demo/Host", "seven", "()I"), |_, _| Ok(Some(Value::Int(7))))
        .build();
    assert_eq!(
        call_static(&vm, "demo/Arr", "fill", "()I", Vec::new()).unwrap(),
        Some(Value::Int(10))
    );
    let err = call_static(&vm, "demo/Arr", "overrun", "()V", Vec::new()).unwrap_err();
    assert_eq!(
        err.exception().unwrap().class_name(),
        "java/lang/ArrayIndexOutOfBoundsException"
    );
}
