// libs/schedule-cell/src/services/slots.rs
use chrono::{Duration, NaiveTime};
use uuid::Uuid;

use crate::models::Slot;

/// Divide a working window into uniform bookable units.
///
/// Deterministic: a cursor starts at `start_time` and emits
/// `[cursor, cursor + duration)` while the full unit still fits before
/// `end_time`. No partial trailing slot is emitted, and a window shorter
/// than one duration produces nothing. Invoked exactly once, when a
/// FixedSlot window is created.
pub fn generate_slots(
    schedule_id: Uuid,
    start_time: NaiveTime,
    end_time: NaiveTime,
    slot_duration_minutes: i64,
) -> Vec<Slot> {
    if slot_duration_minutes <= 0 || end_time <= start_time {
        return Vec::new();
    }

    let duration = Duration::minutes(slot_duration_minutes);
    let mut slots = Vec::new();
    let mut cursor = start_time;

    // NaiveTime arithmetic wraps at midnight; overflowing_add_signed exposes
    // the wrap so generation stops at the end of the civil day.
    loop {
        let (slot_end, wrapped) = cursor.overflowing_add_signed(duration);
        if wrapped != 0 || slot_end > end_time {
            break;
        }

        slots.push(Slot {
            id: Uuid::new_v4(),
            schedule_id,
            start_time: cursor,
            end_time: slot_end,
            taken: false,
        });

        cursor = slot_end;
    }

    slots
}
