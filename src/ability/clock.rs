//! The `Sleep` ability used by schedules.

use super::{Ability, Resolution};
use crate::effect::Effect;
use crate::error::ErrorSet;
use crate::handler::Handler;
use std::time::Duration;

/// Request to pause for a duration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Sleep(pub Duration);

impl Ability for Sleep {
    type Output = ();
    const NAME: &'static str = "Sleep";
}

/// Pauses the computation for `duration`.
pub fn sleep<E: ErrorSet>(duration: Duration) -> Effect<E, ()> {
    Effect::perform(Sleep(duration))
}

/// Handles [`Sleep`] by blocking the current thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleep;

impl Handler<Sleep> for ThreadSleep {
    fn handle(&self, Sleep(duration): Sleep) -> Resolution<Sleep> {
        std::thread::sleep(duration);
        Resolution::Resolved(())
    }
}
