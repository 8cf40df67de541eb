//! Integration tests for wasm-zstd-core.
//!
//! These tests drive a small allocator fixture module through the bridge:
//! - Export resolution and signature checks
//! - Calls through the call stack, including traps
//! - Arena reservations, sub-allocation and release
//! - Instance pooling across threads

use std::collections::HashSet;
use std::sync::Arc;

use wasm_zstd_common::{BridgeError, EngineConfig, PoolConfig};
use wasm_zstd_core::{
    Arena, Exports, GuestAbi, GuestFunc, GuestInstance, GuestModule, InstancePool, SlotKind,
    WasmEngine,
};

const FIXTURE: &str = r#"
(module
  (memory (export "memory") 1)
  (global $top (mut i32) (i32.const 1024))
  (global $live (mut i32) (i32.const 0))

  (func (export "malloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local $end i32)
    (if (i32.ge_u (local.get $size) (i32.const 0x10000000))
      (then (return (i32.const 0))))
    (local.set $ptr (global.get $top))
    (local.set $end
      (i32.and
        (i32.add (i32.add (local.get $ptr) (local.get $size)) (i32.const 7))
        (i32.const -8)))
    (if (i32.gt_u (local.get $end) (i32.mul (memory.size) (i32.const 65536)))
      (then
        (if (i32.eq
              (memory.grow
                (i32.sub
                  (i32.shr_u (i32.add (local.get $end) (i32.const 65535)) (i32.const 16))
                  (memory.size)))
              (i32.const -1))
          (then (return (i32.const 0))))))
    (global.set $top (local.get $end))
    (global.set $live (i32.add (global.get $live) (i32.const 1)))
    (local.get $ptr))

  (func (export "free") (param $ptr i32)
    (if (i32.eqz (local.get $ptr)) (then (return)))
    (global.set $live (i32.sub (global.get $live) (i32.const 1)))
    (if (i32.eqz (global.get $live))
      (then (global.set $top (i32.const 1024)))))

  (func (export "live") (result i32)
    (global.get $live))

  (func (export "sum5") (param i32 i32 i32 i32 i32) (result i32)
    (i32.add
      (i32.add
        (i32.add (i32.add (local.get 0) (local.get 1)) (local.get 2))
        (local.get 3))
      (local.get 4)))

  (func (export "checksum") (param $ptr i32) (param $len i32) (result i32)
    (local $sum i32)
    (local $end i32)
    (local.set $end (i32.add (local.get $ptr) (local.get $len)))
    (block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $ptr) (local.get $end)))
        (local.set $sum (i32.add (local.get $sum) (i32.load8_u (local.get $ptr))))
        (local.set $ptr (i32.add (local.get $ptr) (i32.const 1)))
        (br $next)))
    (local.get $sum))

  (func (export "fill") (param $ptr i32) (param $len i32) (param $byte i32)
    (memory.fill (local.get $ptr) (local.get $byte) (local.get $len)))

  (func (export "negate64") (param i64) (result i64)
    (i64.sub (i64.const 0) (local.get 0)))

  (func (export "trap")
    unreachable)

  (func (export "half") (param f32) (result f32)
    (f32.div (local.get 0) (f32.const 2)))
)
"#;

struct FixtureAbi {
    live: GuestFunc,
    sum5: GuestFunc,
    checksum: GuestFunc,
    fill: GuestFunc,
    negate64: GuestFunc,
    trap: GuestFunc,
}

impl GuestAbi for FixtureAbi {
    fn resolve(exports: &mut Exports<'_>) -> Result<Self, BridgeError> {
        Ok(Self {
            live: exports.func("live")?,
            sum5: exports.func("sum5")?,
            checksum: exports.func("checksum")?,
            fill: exports.func("fill")?,
            negate64: exports.func("negate64")?,
            trap: exports.func("trap")?,
        })
    }
}

struct FloatAbi;

impl GuestAbi for FloatAbi {
    fn resolve(exports: &mut Exports<'_>) -> Result<Self, BridgeError> {
        exports.func("half")?;
        Ok(Self)
    }
}

fn module() -> GuestModule {
    let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
    GuestModule::from_wat(&engine, FIXTURE).unwrap()
}

fn instance() -> GuestInstance<FixtureAbi> {
    GuestInstance::new(&module()).unwrap()
}

fn live(instance: &mut GuestInstance<FixtureAbi>) -> u64 {
    instance.call(instance.abi().live, &[]).unwrap()
}

// ============================================================================
// Export resolution
// ============================================================================

#[test]
fn test_resolve_exports() {
    let instance = instance();

    assert_eq!(instance.abi().sum5.arity(), 5);
    assert_eq!(instance.abi().fill.result(), None);
    assert_eq!(instance.abi().negate64.result(), Some(SlotKind::I64));
    assert!(instance.memory_size() >= 65536);
}

#[test]
fn test_missing_export() {
    let wat = r#"
        (module
            (memory (export "memory") 1)
            (func (export "malloc") (param i32) (result i32) (i32.const 0))
        )
    "#;
    let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
    let module = GuestModule::from_wat(&engine, wat).unwrap();

    let err = GuestInstance::<()>::new(&module).unwrap_err();
    assert!(
        matches!(&err, BridgeError::MissingExport { name } if name == "free"),
        "unexpected error: {err}"
    );
}

#[test]
fn test_missing_memory() {
    let wat = r#"
        (module
            (func (export "malloc") (param i32) (result i32) (i32.const 0))
            (func (export "free") (param i32))
        )
    "#;
    let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
    let module = GuestModule::from_wat(&engine, wat).unwrap();

    let err = GuestInstance::<()>::new(&module).unwrap_err();
    assert!(matches!(&err, BridgeError::MissingExport { name } if name == "memory"));
}

#[test]
fn test_unsupported_signature() {
    let err = GuestInstance::<FloatAbi>::new(&module()).unwrap_err();
    assert!(
        matches!(&err, BridgeError::SignatureMismatch { name, .. } if name == "half"),
        "unexpected error: {err}"
    );
}

// ============================================================================
// Call stack
// ============================================================================

#[test]
fn test_call_five_arguments() {
    let mut instance = instance();

    let result = instance
        .call(instance.abi().sum5, &[1, 2, 3, 4, 5])
        .unwrap();
    assert_eq!(result, 15);
    assert_eq!(instance.stack().slots()[0], 15);
}

#[test]
fn test_call_i32_result_is_zero_extended() {
    let mut instance = instance();

    let result = instance
        .call(instance.abi().sum5, &[0xFFFF_FFFF, 0, 0, 0, 0])
        .unwrap();
    assert_eq!(result, 0xFFFF_FFFF);
}

#[test]
fn test_call_i64() {
    let mut instance = instance();

    let result = instance.call(instance.abi().negate64, &[2]).unwrap();
    assert_eq!(result, u64::MAX - 1);
}

#[test]
fn test_call_wrong_arity() {
    let mut instance = instance();

    let err = instance.call(instance.abi().sum5, &[1, 2]).unwrap_err();
    assert!(matches!(err, BridgeError::SignatureMismatch { .. }));
}

#[test]
fn test_call_trap() {
    let mut instance = instance();

    let err = instance.call(instance.abi().trap, &[]).unwrap_err();
    match err {
        BridgeError::InvocationFailed { name, trap, .. } => {
            assert_eq!(name, "trap");
            assert_eq!(trap.as_deref(), Some("UnreachableCodeReached"));
        }
        other => panic!("expected invocation failure, got {other}"),
    }
}

// ============================================================================
// Arena
// ============================================================================

#[test]
fn test_arena_write_and_read() {
    let mut instance = instance();

    let mut arena = Arena::reserve(&mut instance, 64).unwrap();
    let ptr = arena.write(b"hello").unwrap();
    assert_eq!(ptr, arena.base());
    assert_eq!(arena.remaining(), 59);

    let checksum = arena.instance().abi().checksum;
    let sum = arena.instance().call(checksum, &[u64::from(ptr), 5]).unwrap();
    assert_eq!(sum, b"hello".iter().map(|&b| u64::from(b)).sum::<u64>());

    let mut back = [0u8; 5];
    arena.read(ptr, &mut back).unwrap();
    assert_eq!(&back, b"hello");
}

#[test]
fn test_arena_allocations_are_consecutive() {
    let mut instance = instance();

    let mut arena = Arena::reserve(&mut instance, 30).unwrap();
    let a = arena.allocate(10).unwrap();
    let b = arena.write(&[7; 12]).unwrap();
    let c = arena.allocate(8).unwrap();

    assert_eq!(a, arena.base());
    assert_eq!(b, a + 10);
    assert_eq!(c, b + 12);
    assert_eq!(arena.remaining(), 0);
}

#[test]
fn test_arena_guest_writes_visible_to_host() {
    let mut instance = instance();

    let mut arena = Arena::reserve(&mut instance, 16).unwrap();
    let ptr = arena.allocate(16).unwrap();
    let fill = arena.instance().abi().fill;
    arena
        .instance()
        .call(fill, &[u64::from(ptr), 16, 0xAB])
        .unwrap();

    let mut back = [0u8; 16];
    arena.read(ptr, &mut back).unwrap();
    assert_eq!(back, [0xAB; 16]);
}

#[test]
fn test_arena_overflow() {
    let mut instance = instance();

    let mut arena = Arena::reserve(&mut instance, 8).unwrap();
    arena.allocate(6).unwrap();
    let err = arena.allocate(3).unwrap_err();

    assert!(matches!(
        err,
        BridgeError::ReservationExceeded {
            requested: 3,
            remaining: 2
        }
    ));
    assert!(arena.write(&[0; 3]).is_err());
}

#[test]
fn test_arena_freed_on_drop() {
    let mut instance = instance();

    {
        let mut arena = Arena::reserve(&mut instance, 128).unwrap();
        arena.write(&[1; 128]).unwrap();
        let live_fn = arena.instance().abi().live;
        assert_eq!(arena.instance().call(live_fn, &[]).unwrap(), 1);
    }

    assert_eq!(live(&mut instance), 0);
}

#[test]
fn test_arena_release() {
    let mut instance = instance();

    let arena = Arena::reserve(&mut instance, 32).unwrap();
    arena.release().unwrap();

    assert_eq!(live(&mut instance), 0);
}

#[test]
fn test_nested_arenas() {
    let mut instance = instance();

    {
        let mut outer = Arena::reserve(&mut instance, 16).unwrap();
        let src = outer.write(b"abc").unwrap();
        {
            let mut inner = Arena::reserve(outer.instance(), 16).unwrap();
            let dst = inner.allocate(16).unwrap();
            assert!(dst >= src + 16, "reservations overlap");
            assert_eq!(live(inner.instance()), 2);
        }
        assert_eq!(live(outer.instance()), 1);
    }

    assert_eq!(live(&mut instance), 0);
}

#[test]
fn test_arena_grows_guest_memory() {
    let mut instance = instance();
    let before = instance.memory_size();

    let mut arena = Arena::reserve(&mut instance, 200_000).unwrap();
    let ptr = arena.write(&vec![9; 200_000]).unwrap();

    let mut last = [0u8; 1];
    arena.read(ptr + 199_999, &mut last).unwrap();
    assert_eq!(last, [9]);
    drop(arena);

    assert!(instance.memory_size() > before);
}

#[test]
fn test_arena_guest_out_of_memory() {
    let mut instance = instance();

    let err = Arena::reserve(&mut instance, 0x1000_0000).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::GuestOutOfMemory {
            requested: 0x1000_0000
        }
    ));
}

#[test]
fn test_read_out_of_bounds() {
    let instance = instance();

    let mut buf = [0u8; 16];
    let offset = u32::try_from(instance.memory_size()).unwrap() - 8;
    let err = instance.read(offset, &mut buf).unwrap_err();
    assert!(matches!(err, BridgeError::MemoryAccess { len: 16, .. }));
}

// ============================================================================
// Pool
// ============================================================================

#[test]
fn test_pool_reuses_instances() {
    let pool: InstancePool<FixtureAbi> = InstancePool::new(module(), PoolConfig::default());

    let first_id = pool.acquire().unwrap().id();
    let second_id = pool.acquire().unwrap().id();

    assert_eq!(first_id, second_id);
    assert_eq!(pool.created_count(), 1);
    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn test_pool_lends_distinct_instances() {
    let pool: InstancePool<FixtureAbi> = InstancePool::new(module(), PoolConfig::default());

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(pool.idle_count(), 0);

    drop(a);
    drop(b);
    assert_eq!(pool.idle_count(), 2);
}

#[test]
fn test_pool_max_idle() {
    let config = PoolConfig { max_idle: Some(1) };
    let pool: InstancePool<FixtureAbi> = InstancePool::new(module(), config);

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    drop(a);
    drop(b);

    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.created_count(), 2);
}

#[test]
fn test_pool_trim() {
    let pool: InstancePool<FixtureAbi> = InstancePool::new(module(), PoolConfig::default());

    let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    drop(held);
    assert_eq!(pool.idle_count(), 3);

    pool.trim(1);
    assert_eq!(pool.idle_count(), 1);
    pool.trim(0);
    assert_eq!(pool.idle_count(), 0);
}

#[test]
fn test_pool_discards_instance_after_panic() {
    let pool: InstancePool<FixtureAbi> = InstancePool::new(module(), PoolConfig::default());

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let mut instance = pool.acquire().unwrap();
        let _arena = Arena::reserve(&mut *instance, 64).unwrap();
        panic!("simulated bridge failure");
    }));

    assert!(result.is_err());
    assert_eq!(pool.idle_count(), 0);
}

#[test]
fn test_pool_concurrent_isolation() {
    let pool: Arc<InstancePool<FixtureAbi>> =
        Arc::new(InstancePool::new(module(), PoolConfig::default()));
    let barrier = std::sync::Barrier::new(4);

    let ids: HashSet<u64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let pool = &pool;
                let barrier = &barrier;
                scope.spawn(move || {
                    let mut instance = pool.acquire().unwrap();
                    barrier.wait();

                    let payload = vec![i; 1000];
                    let mut arena = Arena::reserve(&mut *instance, 1000).unwrap();
                    let ptr = arena.write(&payload).unwrap();
                    let checksum = arena.instance().abi().checksum;
                    let sum = arena
                        .instance()
                        .call(checksum, &[u64::from(ptr), 1000])
                        .unwrap();
                    assert_eq!(sum, u64::from(i) * 1000);
                    drop(arena);

                    let id = instance.id();
                    barrier.wait();
                    id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(ids.len(), 4);
    assert_eq!(pool.idle_count(), 4);
}
