//! am-patch's binary entry point: wire up process-level tracing, then hand
//! argv straight to [`am_patch::engine::run`].

fn main() {
    am_patch::logging::init_tracing();
    let code = am_patch::engine::run(std::env::args());
    std::process::exit(code);
}
