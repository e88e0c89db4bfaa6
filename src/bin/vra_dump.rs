//! Demo driver: build a small module, run the `vra` pass, dump JSON
//!
//! Constructs three representative functions (straight-line math, a
//! diamond with a PHI join, and a counted accumulation loop), runs the
//! registered value-range-analysis pass over them, and prints each
//! function's scope chain as JSON. Set `RUST_LOG=vra=debug` to watch the
//! traversal.

#![forbid(unsafe_code)]

use anyhow::Context;

use vra::ir::{BinOp, CmpPred, FunctionBuilder, Initializer, Module, Value};
use vra::{ModulePass, PassRegistry, VraPass};

fn demo_module() -> anyhow::Result<Module> {
    let mut m = Module::new("demo");
    m.add_global("SCALE", Initializer::Int(4));

    // straight: return SCALE * 10 + 2
    let mut fb = FunctionBuilder::new("straight", &[]);
    let entry = fb.block("entry");
    fb.binary(entry, "p", BinOp::Mul, Value::var("SCALE"), Value::int(10));
    fb.binary(entry, "r", BinOp::Add, Value::var("p"), Value::int(2));
    fb.ret(entry, Some(Value::var("r")));
    m.add_function(fb.finish().context("build straight")?);

    // diamond: return c ? 3 : 30
    let mut fb = FunctionBuilder::new("diamond", &["c"]);
    let entry = fb.block("entry");
    let t = fb.block("then");
    let e = fb.block("else");
    let join = fb.block("join");
    fb.cond_br(entry, Value::var("c"), t, e);
    fb.binary(t, "x", BinOp::Add, Value::int(1), Value::int(2));
    fb.br(t, join);
    fb.binary(e, "y", BinOp::Add, Value::int(10), Value::int(20));
    fb.br(e, join);
    fb.phi(join, "out", vec![(Value::var("x"), t), (Value::var("y"), e)]);
    fb.ret(join, Some(Value::var("out")));
    m.add_function(fb.finish().context("build diamond")?);

    // sum: for (i = 0; i < 10; i += 1) s += i; return s
    let mut fb = FunctionBuilder::new("sum", &[]);
    let entry = fb.block("entry");
    let header = fb.block("header");
    let body = fb.block("body");
    let latch = fb.block("latch");
    let exit = fb.block("exit");
    fb.br(entry, header);
    fb.phi(header, "i", vec![(Value::int(0), entry), (Value::var("i.next"), latch)]);
    fb.phi(header, "s", vec![(Value::int(0), entry), (Value::var("s.next"), latch)]);
    fb.cmp(header, "c", CmpPred::Slt, Value::var("i"), Value::int(10));
    fb.cond_br(header, Value::var("c"), body, exit);
    fb.binary(body, "s.next", BinOp::Add, Value::var("s"), Value::var("i"));
    fb.br(body, latch);
    fb.binary(latch, "i.next", BinOp::Add, Value::var("i"), Value::int(1));
    fb.br(latch, header);
    fb.ret(exit, Some(Value::var("s.next")));
    m.add_function(fb.finish().context("build sum")?);

    Ok(m)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "vra=info".into()))
        .with_target(false)
        .compact()
        .init();

    let module = demo_module()?;

    let registry = PassRegistry::with_default_passes();
    anyhow::ensure!(registry.create("vra").is_some(), "vra pass not registered");

    let mut vra = VraPass::new();
    vra.run(&module);

    for name in ["straight", "diamond", "sum"] {
        let json = vra
            .function_scope_json(name)
            .with_context(|| format!("scope for {name}"))?;
        println!("{name}: {}", serde_json::to_string_pretty(&json)?);
    }
    Ok(())
}
