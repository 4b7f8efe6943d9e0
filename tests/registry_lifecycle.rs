//! Process-wide dispatcher registry: lazy creation, explicit init, teardown.
//!
//! The registry is global, so the whole lifecycle runs in one test.

use scopeline::runtime::registry;
use scopeline::test_utils::init_test_logging;
use scopeline::{test_complete, test_phase, Context, Error, PoolConfig, RejectReason, RuntimeConfig, Scope};
use std::time::Duration;

#[test]
fn registry_lifecycle() {
    init_test_logging();
    test_phase!("registry_lifecycle");
    assert!(!registry::is_live());

    let config = RuntimeConfig::default()
        .with_pool(PoolConfig::for_parallelism(4))
        .with_shutdown_grace(Duration::from_millis(200))
        .with_thread_name_prefix("lifecycle");
    let dispatchers = registry::init(config).expect("first init");
    assert!(registry::is_live());
    assert!(matches!(
        registry::init(RuntimeConfig::default()),
        Err(Error::IllegalState(_))
    ));
    assert_eq!(dispatchers.config().thread_name_prefix, "lifecycle");

    // A scope without a dispatcher runs on the registry's default pool.
    let scope = Scope::new(Context::new());
    let name = scope
        .spawn(|_| Ok(std::thread::current().name().map(str::to_string)))
        .expect("spawn")
        .join()
        .expect("runs");
    assert!(name.is_some_and(|name| name.starts_with("lifecycle")));

    let main = Scope::new(Context::main().expect("registry live"));
    let on_main = main
        .spawn(|_| {
            let dispatchers = registry::global()?;
            Ok(dispatchers.main_thread().is_dispatch_thread())
        })
        .expect("spawn")
        .join()
        .expect("runs");
    assert!(on_main);
    main.close();

    let io = Scope::new(Context::io().expect("registry live"));
    assert_eq!(io.spawn(|_| Ok(7)).expect("spawn").join().expect("runs"), 7);
    io.close();

    assert!(registry::shutdown());
    assert!(!registry::shutdown());
    assert!(!registry::is_live());
    assert!(matches!(
        registry::global(),
        Err(Error::Rejected(RejectReason::Shutdown))
    ));

    let late = scope.launch(|_| Ok(())).expect("launch reports failure later");
    assert!(matches!(
        late.wait(),
        Err(Error::Rejected(RejectReason::Shutdown))
    ));
    scope.close();

    registry::init(RuntimeConfig::default()).expect("init allowed again after shutdown");
    assert!(registry::is_live());
    assert!(registry::shutdown());
    test_complete!("registry_lifecycle");
}
