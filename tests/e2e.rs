use ember::reporter::{Report, Reporter};
use ember::vm::Vm;
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::io;
use std::rc::Rc;

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct TestReporter {
    errors: Vec<String>,
    runtime_errors: Vec<String>,
}

impl<'a> Reporter<'a> for TestReporter {
    fn warning(&mut self, _report: Report<'a>) {}

    fn error(&mut self, report: Report<'a>) {
        self.errors.push(report.to_string());
    }

    fn runtime_error(&mut self, msg: &str, _backtrace: &[(Option<String>, u32)]) {
        self.runtime_errors.push(msg.to_string());
    }
}

fn run(source: &str) -> (String, TestReporter) {
    let out = SharedBuf::default();
    let mut vm = Vm::with_output(Box::new(out.clone()));
    let mut reporter = TestReporter::default();
    let _ = ember::interpret(source, &mut vm, &mut reporter);
    let bytes = out.0.borrow().clone();
    (String::from_utf8(bytes).unwrap(), reporter)
}

#[test]
fn arithmetic_precedence() {
    let (stdout, reporter) = run("print 1 + 2 * 3;");
    assert!(reporter.errors.is_empty());
    assert_eq!(stdout, "7\n");
}

#[test]
fn string_concatenation() {
    let (stdout, _) = run(r#"var a = "hi"; var b = " there"; print a + b;"#);
    assert_eq!(stdout, "hi there\n");
}

#[test]
fn closures_share_captured_state() {
    let (stdout, _) = run(
        "fun mk() { var i = 0; fun inc() { i = i + 1; return i; } return inc; } \
         var c = mk(); print c(); print c(); print c();",
    );
    assert_eq!(stdout, "1\n2\n3\n");
}

#[test]
fn methods_and_instances() {
    let (stdout, _) = run(r#"class Cake { taste() { return "good"; } } print Cake().taste();"#);
    assert_eq!(stdout, "good\n");
}

#[test]
fn super_calls_reach_the_parent_method() {
    let (stdout, _) = run(
        r#"class A { f() { return "A"; } }
           class B < A { f() { return super.f() + "B"; } }
           print B().f();"#,
    );
    assert_eq!(stdout, "AB\n");
}

#[test]
fn for_loop_accumulates() {
    let (stdout, _) = run("var n = 0; for (var i = 0; i < 5; i = i + 1) n = n + i; print n;");
    assert_eq!(stdout, "10\n");
}

#[test]
fn two_closures_from_the_same_call_share_an_upvalue() {
    let (stdout, _) = run(
        "class Pair { init(get, inc) { this.get = get; this.inc = inc; } }
         fun mk() {
            var i = 0;
            fun get() { return i; }
            fun inc() { i = i + 1; }
            return Pair(get, inc);
         }
         var pair = mk();
         pair.inc();
         pair.inc();
         print pair.get();",
    );
    assert_eq!(stdout, "2\n");
}

#[test]
fn adding_a_number_and_a_string_is_a_runtime_error() {
    let (_, reporter) = run(r#"print 1 + "x";"#);
    assert_eq!(reporter.runtime_errors.len(), 1);
    assert_eq!(
        reporter.runtime_errors[0],
        "Operands must be two numbers or two strings."
    );
}

#[test]
fn calling_with_the_wrong_number_of_arguments_is_a_runtime_error() {
    let (_, reporter) = run("fun f(){} f(1);");
    assert_eq!(reporter.runtime_errors.len(), 1);
    assert!(reporter.runtime_errors[0].contains("Expected 0 arguments but got 1"));
}

#[test]
fn returning_a_value_from_an_initializer_is_a_compile_error() {
    let (_, reporter) = run("class A { init() { return 1; } }");
    assert_eq!(reporter.errors.len(), 1);
    assert!(reporter.errors[0].contains("Can't return a value from an initializer"));
}

#[test]
fn undefined_global_is_a_runtime_error() {
    let (_, reporter) = run("print nope;");
    assert_eq!(reporter.runtime_errors.len(), 1);
    assert!(reporter.runtime_errors[0].contains("Undefined variable 'nope'"));
}

#[test]
fn gc_stress_mode_does_not_change_observable_behavior() {
    let out = SharedBuf::default();
    let mut vm = Vm::with_output(Box::new(out.clone()));
    vm.heap().stress.set(true);
    let mut reporter = TestReporter::default();
    let source = "class A { init(v) { this.v = v; } get() { return this.v; } }
                  var items = A(1);
                  print items.get();";
    let _ = ember::interpret(source, &mut vm, &mut reporter);
    let bytes = out.0.borrow().clone();
    assert_eq!(String::from_utf8(bytes).unwrap(), "1\n");
}
