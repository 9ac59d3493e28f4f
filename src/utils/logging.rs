/// 初始化 `log` 输出，默认 info，可用 `RUST_LOG` 覆盖；重复调用无副作用
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
