// libs/schedule-cell/tests/integration_test.rs
//
// Service-level tests against a mocked PostgREST store. The interesting
// cases are the conditional-update outcomes: a reservation PATCH that
// matches no row must surface as the right conflict, never as success.

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use schedule_cell::models::{
    CreateScheduleMode, CreateScheduleRequest, Reservation, ReserveError, ScheduleError,
    ScheduleMode, ScheduleWindow, SlotListing,
};
use schedule_cell::services::availability::AvailabilityService;
use schedule_cell::services::schedule::ScheduleService;
use shared_utils::clock::FixedClock;
use shared_utils::test_utils::{MockStoreRows, TestConfig};

const TOKEN: &str = "test-token";

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn window(id: Uuid, date: NaiveDate, mode: ScheduleMode) -> ScheduleWindow {
    ScheduleWindow {
        id,
        doctor_id: Uuid::new_v4(),
        date,
        start_time: t(9, 0),
        end_time: t(12, 0),
        mode,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

async fn availability(server: &MockServer) -> AvailabilityService {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    AvailabilityService::with_clock(
        &config,
        Arc::new(FixedClock::at("2025-06-01T10:00:00+05:30")),
    )
}

// ==============================================================================
// RESERVE: FIXED SLOT
// ==============================================================================

#[tokio::test]
async fn reserve_fixed_slot_flips_taken_flag() {
    let server = MockServer::start().await;
    let schedule_id = Uuid::new_v4();
    let slot_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .and(query_param("taken", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::slot(&slot_id.to_string(), &schedule_id.to_string(),
                                "09:00:00", "09:30:00", true)
        ])))
        .mount(&server)
        .await;

    let service = availability(&server).await;
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let w = window(schedule_id, date, ScheduleMode::FixedSlot { slot_duration_minutes: 30 });

    let reservation = service.reserve(&w, Some(slot_id), TOKEN).await.unwrap();
    assert_matches!(reservation, Reservation { slot: Some(ref s), .. } if s.id == slot_id);
}

#[tokio::test]
async fn reserve_fixed_slot_lost_race_is_slot_taken() {
    let server = MockServer::start().await;
    let schedule_id = Uuid::new_v4();
    let slot_id = Uuid::new_v4();

    // Guard misses: the slot was taken between listing and reserving.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    // The slot row still exists, so this is a race, not a bad id.
    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::slot(&slot_id.to_string(), &schedule_id.to_string(),
                                "09:00:00", "09:30:00", true)
        ])))
        .mount(&server)
        .await;

    let service = availability(&server).await;
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let w = window(schedule_id, date, ScheduleMode::FixedSlot { slot_duration_minutes: 30 });

    let err = service.reserve(&w, Some(slot_id), TOKEN).await.unwrap_err();
    assert_matches!(err, ReserveError::SlotTaken);
}

#[tokio::test]
async fn reserve_fixed_slot_unknown_id_is_slot_not_found() {
    let server = MockServer::start().await;
    let schedule_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let service = availability(&server).await;
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let w = window(schedule_id, date, ScheduleMode::FixedSlot { slot_duration_minutes: 30 });

    let err = service.reserve(&w, Some(Uuid::new_v4()), TOKEN).await.unwrap_err();
    assert_matches!(err, ReserveError::SlotNotFound);

    // A fixed-slot reservation without a slot id never reaches the store.
    let err = service.reserve(&w, None, TOKEN).await.unwrap_err();
    assert_matches!(err, ReserveError::SlotNotFound);
}

// ==============================================================================
// RESERVE: FLEXIBLE RANGE
// ==============================================================================

#[tokio::test]
async fn reserve_flexible_increments_against_observed_count() {
    let server = MockServer::start().await;
    let schedule_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_schedules"))
        .and(query_param("id", format!("eq.{}", schedule_id)))
        .and(query_param("booked_count", "eq.2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::flexible_schedule(&schedule_id.to_string(),
                &Uuid::new_v4().to_string(), "2025-06-02", "09:00:00", "12:00:00", 4, 3)
        ])))
        .mount(&server)
        .await;

    let service = availability(&server).await;
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let w = window(schedule_id, date, ScheduleMode::FlexibleRange { capacity: 4, booked_count: 2 });

    let reservation = service.reserve(&w, None, TOKEN).await.unwrap();
    assert_matches!(reservation, Reservation { slot: None, .. });
}

#[tokio::test]
async fn reserve_flexible_at_capacity_fails_without_store_call() {
    // No mock server mounted: exhaustion is decided from the observed state.
    let config = TestConfig::default().to_app_config();
    let service = AvailabilityService::with_clock(
        &config,
        Arc::new(FixedClock::at("2025-06-01T10:00:00+05:30")),
    );

    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let w = window(Uuid::new_v4(), date,
                   ScheduleMode::FlexibleRange { capacity: 3, booked_count: 3 });

    let err = service.reserve(&w, None, TOKEN).await.unwrap_err();
    assert_matches!(err, ReserveError::CapacityExhausted);
}

#[tokio::test]
async fn reserve_flexible_cas_miss_with_room_is_transient() {
    let server = MockServer::start().await;
    let schedule_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    // Re-read shows the counter moved but room remains.
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::flexible_schedule(&schedule_id.to_string(),
                &Uuid::new_v4().to_string(), "2025-06-02", "09:00:00", "12:00:00", 4, 2)
        ])))
        .mount(&server)
        .await;

    let service = availability(&server).await;
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let w = window(schedule_id, date, ScheduleMode::FlexibleRange { capacity: 4, booked_count: 1 });

    let err = service.reserve(&w, None, TOKEN).await.unwrap_err();
    assert_matches!(err, ReserveError::TransientConflict);
}

#[tokio::test]
async fn reserve_flexible_cas_miss_at_capacity_is_exhausted() {
    let server = MockServer::start().await;
    let schedule_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::flexible_schedule(&schedule_id.to_string(),
                &Uuid::new_v4().to_string(), "2025-06-02", "09:00:00", "12:00:00", 4, 4)
        ])))
        .mount(&server)
        .await;

    let service = availability(&server).await;
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let w = window(schedule_id, date, ScheduleMode::FlexibleRange { capacity: 4, booked_count: 3 });

    let err = service.reserve(&w, None, TOKEN).await.unwrap_err();
    assert_matches!(err, ReserveError::CapacityExhausted);
}

// ==============================================================================
// LISTINGS
// ==============================================================================

#[tokio::test]
async fn slot_listing_returns_only_untaken_slots() {
    let server = MockServer::start().await;
    let schedule_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::fixed_slot_schedule(&schedule_id.to_string(),
                &doctor_id.to_string(), "2025-06-02", "09:00:00", "10:00:00", 30)
        ])))
        .mount(&server)
        .await;

    // The store applies the taken=eq.false filter; the service just asks.
    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("taken", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::slot(&Uuid::new_v4().to_string(), &schedule_id.to_string(),
                                "09:30:00", "10:00:00", false)
        ])))
        .mount(&server)
        .await;

    let service = availability(&server).await;
    let listing = service.list_available_slots(schedule_id, TOKEN).await.unwrap();

    assert_matches!(listing, SlotListing::Slots { ref slots } if slots.len() == 1);
}

#[tokio::test]
async fn range_listing_reports_remaining_capacity() {
    let server = MockServer::start().await;
    let schedule_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::flexible_schedule(&schedule_id.to_string(),
                &Uuid::new_v4().to_string(), "2025-06-02", "09:00:00", "12:00:00", 4, 4)
        ])))
        .mount(&server)
        .await;

    let service = availability(&server).await;
    let listing = service.list_available_slots(schedule_id, TOKEN).await.unwrap();

    assert_matches!(listing, SlotListing::Range { available: false, booked_count: 4, .. });
}

#[tokio::test]
async fn listing_unknown_schedule_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let service = availability(&server).await;
    let err = service
        .list_available_slots(Uuid::new_v4(), TOKEN)
        .await
        .unwrap_err();
    assert_matches!(err, ScheduleError::NotFound);
}

#[tokio::test]
async fn available_schedules_skips_windows_inside_booking_lead() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    // Clock is pinned at 10:00 on 2025-06-01; booking lead is 15 minutes.
    // 10:05 today is too soon, tomorrow's window is fine.
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::flexible_schedule(&Uuid::new_v4().to_string(),
                &doctor_id.to_string(), "2025-06-01", "10:05:00", "12:00:00", 4, 0),
            MockStoreRows::flexible_schedule(&Uuid::new_v4().to_string(),
                &doctor_id.to_string(), "2025-06-02", "09:00:00", "12:00:00", 4, 0),
        ])))
        .mount(&server)
        .await;

    let service = availability(&server).await;
    let from = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2025, 6, 7).unwrap();

    let schedules = service
        .list_available_schedules(doctor_id, from, to, TOKEN)
        .await
        .unwrap();

    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0].date, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
}

#[tokio::test]
async fn available_schedules_skips_exhausted_windows() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::flexible_schedule(&Uuid::new_v4().to_string(),
                &doctor_id.to_string(), "2025-06-02", "09:00:00", "12:00:00", 2, 2),
            MockStoreRows::flexible_schedule(&Uuid::new_v4().to_string(),
                &doctor_id.to_string(), "2025-06-03", "09:00:00", "12:00:00", 2, 1),
        ])))
        .mount(&server)
        .await;

    let service = availability(&server).await;
    let from = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2025, 6, 7).unwrap();

    let schedules = service
        .list_available_schedules(doctor_id, from, to, TOKEN)
        .await
        .unwrap();

    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0].date, NaiveDate::from_ymd_opt(2025, 6, 3).unwrap());
}

// ==============================================================================
// SCHEDULE MANAGEMENT
// ==============================================================================

fn schedule_service(server: &MockServer) -> ScheduleService {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    ScheduleService::with_clock(
        &config,
        Arc::new(FixedClock::at("2025-06-01T10:00:00+05:30")),
    )
}

#[tokio::test]
async fn create_fixed_slot_schedule_persists_window_and_slots() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let schedule_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreRows::fixed_slot_schedule(&schedule_id.to_string(),
                &doctor_id.to_string(), "2025-06-02", "09:00:00", "12:00:00", 30)
        ])))
        .mount(&server)
        .await;

    let slot_insert = Mock::given(method("POST"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount_as_scoped(&server)
        .await;

    let service = schedule_service(&server);
    let request = CreateScheduleRequest {
        date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        start_time: t(9, 0),
        end_time: t(12, 0),
        mode: CreateScheduleMode::FixedSlot { slot_duration_minutes: 30 },
    };

    let created = service.create_schedule(doctor_id, request, TOKEN).await.unwrap();
    assert_eq!(created.id, schedule_id);
    assert_eq!(created.capacity(), 6);

    drop(slot_insert);
}

#[tokio::test]
async fn create_schedule_rejects_inverted_time_range() {
    let config = TestConfig::default().to_app_config();
    let service = ScheduleService::with_clock(
        &config,
        Arc::new(FixedClock::at("2025-06-01T10:00:00+05:30")),
    );

    let request = CreateScheduleRequest {
        date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        start_time: t(12, 0),
        end_time: t(9, 0),
        mode: CreateScheduleMode::FlexibleRange { capacity: 4 },
    };

    let err = service
        .create_schedule(Uuid::new_v4(), request, TOKEN)
        .await
        .unwrap_err();
    assert_matches!(err, ScheduleError::InvalidTimeRange);
}

#[tokio::test]
async fn create_schedule_enforces_lead_buffer() {
    let config = TestConfig::default().to_app_config();
    let service = ScheduleService::with_clock(
        &config,
        Arc::new(FixedClock::at("2025-06-01T10:00:00+05:30")),
    );

    // 10:15 today is under the 30-minute schedule lead.
    let request = CreateScheduleRequest {
        date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        start_time: t(10, 15),
        end_time: t(12, 0),
        mode: CreateScheduleMode::FlexibleRange { capacity: 4 },
    };

    let err = service
        .create_schedule(Uuid::new_v4(), request, TOKEN)
        .await
        .unwrap_err();
    assert_matches!(err, ScheduleError::PastOrTooSoon { lead_minutes: 30, .. });
}

#[tokio::test]
async fn create_schedule_rejects_exact_duplicate() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": Uuid::new_v4() }
        ])))
        .mount(&server)
        .await;

    let service = schedule_service(&server);
    let request = CreateScheduleRequest {
        date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        start_time: t(9, 0),
        end_time: t(12, 0),
        mode: CreateScheduleMode::FlexibleRange { capacity: 4 },
    };

    let err = service
        .create_schedule(doctor_id, request, TOKEN)
        .await
        .unwrap_err();
    assert_matches!(err, ScheduleError::DuplicateWindow);
}

#[tokio::test]
async fn delete_schedule_refused_while_appointments_reference_it() {
    let server = MockServer::start().await;
    let schedule_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.scheduled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": Uuid::new_v4() }
        ])))
        .mount(&server)
        .await;

    let service = schedule_service(&server);
    let err = service.delete_schedule(schedule_id, TOKEN).await.unwrap_err();
    assert_matches!(err, ScheduleError::ScheduleInUse);
}

#[tokio::test]
async fn delete_schedule_cascades_slots_then_window() {
    let server = MockServer::start().await;
    let schedule_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let slot_delete = Mock::given(method("DELETE"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount_as_scoped(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": schedule_id }
        ])))
        .mount(&server)
        .await;

    let service = schedule_service(&server);
    service.delete_schedule(schedule_id, TOKEN).await.unwrap();

    drop(slot_delete);
}
