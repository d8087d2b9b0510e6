//! Integration tests for handlers and handler stacks.
//!
//! Includes property-based checks that handlers for disjoint abilities
//! commute and that a handler deferring everything is transparent.

use proptest::prelude::*;
use rstest::rstest;
use stateless::ability::Need;
use stateless::error::{ErrNil, RunError};
use stateless::handler::Handler;
use stateless::{Ability, Effect, HandlerStack, Resolution, Runtime, handler_fn, handler_when, need};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Scale(i64);

impl Ability for Scale {
    type Output = i64;
    const NAME: &'static str = "Scale";
}

struct Offset;

impl Ability for Offset {
    type Output = i64;
    const NAME: &'static str = "Offset";
}

struct DeferAll;

impl<A: Ability> Handler<A> for DeferAll {
    fn handle(&self, request: A) -> Resolution<A> {
        Resolution::Deferred(request)
    }
}

fn program(value: i64) -> Effect<ErrNil, i64> {
    Effect::perform(Scale(value)).flat_map(|scaled| Effect::perform(Offset).fmap(move |offset| scaled + offset))
}

// =============================================================================
// Scoped Handlers
// =============================================================================

#[rstest]
fn conditional_handlers_defer_outward() {
    let inner = handler_when(|scale: &Scale| scale.0 < 0, |_: Scale| 0);
    let effect: Effect<ErrNil, (i64, i64)> = Effect::perform(Scale(-3))
        .product(Effect::perform(Scale(3)))
        .handle(inner);
    let runtime = Runtime::new().with_handler(handler_fn(|scale: Scale| scale.0 * 100));
    assert_eq!(runtime.run(effect).unwrap(), (0, 300));
}

#[rstest]
fn nested_scopes_consult_the_innermost_first() {
    let effect: Effect<ErrNil, u8> = need::<u8, _>().supply(1_u8).supply(2_u8);
    assert_eq!(Runtime::empty().run(effect).unwrap(), 1);
}

#[rstest]
fn handle_all_binds_a_whole_stack() {
    let stack = HandlerStack::new()
        .with(handler_fn(|scale: Scale| scale.0 * 2))
        .with(handler_fn(|_: Offset| 1));
    let effect = program(20).handle_all(&stack);
    assert_eq!(Runtime::empty().run(effect).unwrap(), 41);
}

#[rstest]
fn stack_reports_the_abilities_it_handles() {
    let stack = HandlerStack::new().supply(1_u8).with(handler_fn(|_: Offset| 0));
    assert_eq!(stack.len(), 2);
    assert!(stack.handles::<Offset>());
    assert!(stack.handles::<Need<u8>>());
    assert!(!stack.handles::<Scale>());
    let rendered = format!("{stack:?}");
    assert!(rendered.contains("Offset") && rendered.contains("Need"));
}

// =============================================================================
// Effects Supplying Needs
// =============================================================================

fn encoded() -> Effect<ErrNil, Vec<u8>> {
    need::<String, _>().fmap(String::into_bytes)
}

#[rstest]
fn supplied_effects_draw_on_earlier_handlers() {
    let runtime = Runtime::new().supply("ability".to_owned()).supply_effect(encoded);
    assert_eq!(runtime.run(need::<Vec<u8>, ErrNil>()).unwrap(), b"ability".to_vec());
}

#[rstest]
fn supplied_effects_run_once_for_every_request() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let stack = HandlerStack::new().supply(3_usize).supply_effect(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        need::<usize, ErrNil>().fmap(|width| "-".repeat(width))
    });
    let runtime = Runtime::from_handlers(stack);
    let program: Effect<ErrNil, (String, String)> = need::<String, _>().product(need::<String, _>());
    assert_eq!(runtime.run(program).unwrap(), ("---".to_owned(), "---".to_owned()));
    assert_eq!(runtime.run(need::<String, ErrNil>()).unwrap(), "---");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[rstest]
fn supplied_effects_ignore_handlers_added_after_them() {
    let runtime = Runtime::new().supply_effect(encoded).supply("late".to_owned());
    let error = runtime.run(need::<Vec<u8>, ErrNil>()).unwrap_err();
    assert!(matches!(error, RunError::UnhandledAbility(unhandled) if unhandled.ability() == "Need"));
}

// =============================================================================
// Laws
// =============================================================================

proptest! {
    /// Handlers for disjoint abilities can be bound in either order.
    #[test]
    fn prop_disjoint_handlers_commute(value in -1_000_i64..1_000, factor in -50_i64..50, offset in -50_i64..50) {
        let scale = move |request: Scale| request.0 * factor;
        let shift = move |_: Offset| offset;

        let scale_first = program(value).handle(handler_fn(scale)).handle(handler_fn(shift));
        let offset_first = program(value).handle(handler_fn(shift)).handle(handler_fn(scale));

        let runtime = Runtime::empty();
        prop_assert_eq!(runtime.run(scale_first).unwrap(), runtime.run(offset_first).unwrap());
    }

    /// A handler that defers every request behaves as if it were absent.
    #[test]
    fn prop_deferring_handler_is_transparent(value in any::<i32>()) {
        let runtime = Runtime::empty()
            .with_handler(handler_fn(|scale: Scale| scale.0))
            .with_handler(handler_fn(|_: Offset| 7));
        let value = i64::from(value);

        let plain = runtime.run(program(value)).unwrap();
        let deferred = runtime.run(program(value).handle::<Scale, _>(DeferAll).handle::<Offset, _>(DeferAll)).unwrap();
        prop_assert_eq!(plain, deferred);
    }
}
