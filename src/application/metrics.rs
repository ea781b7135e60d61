//! Phone metrics, recorded through the `metrics` facade
//!
//! Nothing is exported from here; the embedding application installs
//! whatever recorder it wants.

use crate::domain::account::RegistrationState;
use crate::domain::call::CallDirection;
use metrics::{counter, describe_counter, describe_gauge, gauge};

pub fn describe_metrics() {
    describe_gauge!("sipphone_active_calls", "Number of calls in the registry");
    describe_counter!(
        "sipphone_calls_total",
        "Total number of calls created, by direction"
    );
    describe_counter!(
        "sipphone_registrations_total",
        "Total number of registration outcomes, by resulting state"
    );
}

pub fn record_call_created(direction: CallDirection) {
    counter!("sipphone_calls_total", "direction" => direction.as_str()).increment(1);
}

pub fn set_active_calls(count: usize) {
    gauge!("sipphone_active_calls").set(count as f64);
}

pub fn record_registration(state: RegistrationState) {
    counter!("sipphone_registrations_total", "state" => state.as_str()).increment(1);
}
