//! DB-free rule checks: delivery windows, offer validation, settlement
//! arithmetic, and winner selection over in-memory offers.

use std::collections::HashMap;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use energy_exchange::error::ApiError;
use energy_exchange::models::{CreateOfferRequest, Offer, OfferSide, OfferStatus, Participant};
use energy_exchange::services::delivery::{min_end_time, required_overlap_minutes};
use energy_exchange::services::matching::{buyer_excess, validate_offer_request};
use energy_exchange::services::scoring::{
    rank_top_k, select_best, SlackBounds, Weights, LOCK_TOP_K,
};
use energy_exchange::services::wallet_ledger::required_funds;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn participant(id: i64, trust: i32, coords: Option<(f64, f64)>) -> Participant {
    Participant {
        id,
        username: format!("participant-{id}"),
        trust_score: trust,
        latitude: coords.map(|c| c.0),
        longitude: coords.map(|c| c.1),
        created_at: Utc::now(),
    }
}

fn offer(owner: i64, side: OfferSide, price: &str, qty: &str, created_offset_s: i64) -> Offer {
    let start = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
    Offer {
        id: Uuid::new_v4(),
        owner_id: owner,
        side,
        price_per_kwh: dec(price),
        quantity_kwh: dec(qty),
        start_time: start,
        end_time: start + Duration::hours(4),
        status: OfferStatus::Active,
        weight_price: None,
        weight_distance: None,
        weight_trust: None,
        created_at: start + Duration::seconds(created_offset_s),
    }
}

#[test]
fn delivery_window_boundaries() {
    // 7 kWh at 7 kW: 60 min transfer + 10 buffer = 70, on a 5-min step.
    assert_eq!(required_overlap_minutes(dec("7.000")), 70);
    // 5 kWh: ceil(42.86) + 10 = 53, rounded up to 55.
    assert_eq!(required_overlap_minutes(dec("5.000")), 55);
    // 0.1 kWh: ceil(0.86) + 10 = 11, rounded up to 15, above the floor.
    assert_eq!(required_overlap_minutes(dec("0.100")), 15);

    let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    assert_eq!(
        min_end_time(start, dec("5.000")),
        start + Duration::minutes(55)
    );
}

#[test]
fn creation_rejects_window_below_minimum() {
    let now = Utc::now();
    let start = now + Duration::minutes(5);
    let req = CreateOfferRequest {
        side: OfferSide::Buy,
        price_per_kwh: dec("200.00"),
        quantity_kwh: dec("5.000"),
        start_time: start,
        end_time: start + Duration::minutes(54),
        weight_price: None,
        weight_distance: None,
        weight_trust: None,
    };
    assert!(matches!(
        validate_offer_request(&req, now),
        Err(ApiError::Validation { .. })
    ));

    let ok = CreateOfferRequest {
        end_time: start + Duration::minutes(55),
        ..req
    };
    assert!(validate_offer_request(&ok, now).is_ok());
}

#[test]
fn settlement_releases_buyer_price_difference() {
    // Buyer escrows 200 x 5 = 1000; execution at 180 costs 900.
    assert_eq!(required_funds(dec("200.00"), dec("5.000")), dec("1000.00"));
    assert_eq!(
        buyer_excess(dec("200.00"), dec("180.00"), dec("5.000")),
        dec("100.00")
    );
    // Excess is computed on rounded funds, never negative at equal prices.
    assert_eq!(
        buyer_excess(dec("180.00"), dec("180.00"), dec("5.000")),
        Decimal::ZERO
    );
}

#[test]
fn preferred_seller_wins_across_all_three_criteria() {
    // Buyer at 200/kWh, default weights. Seller B is cheaper, closer, and
    // more trusted than seller C, so B must win outright.
    let buyer = participant(1, 50, Some((37.5665, 126.9780)));
    let seller_b = participant(2, 90, Some((37.5845, 126.9780)));
    let seller_c = participant(3, 50, Some((37.6384, 126.9780)));

    let buy = offer(1, OfferSide::Buy, "200.00", "5.000", 0);
    let sell_b = offer(2, OfferSide::Sell, "180.00", "5.000", 1);
    let sell_c = offer(3, OfferSide::Sell, "190.00", "5.000", 2);

    let pool = vec![sell_c.clone(), sell_b.clone()];
    let bounds = SlackBounds::from_candidates(buy.price_per_kwh, &pool);
    let sellers: HashMap<i64, Participant> =
        [(2, seller_b), (3, seller_c)].into_iter().collect();

    let ranked = rank_top_k(&buy, &buyer, &pool, &sellers, bounds, LOCK_TOP_K);
    assert_eq!(ranked[0], sell_b.id);

    let winner = select_best(&buy, &buyer, &pool, &sellers, bounds).unwrap();
    assert_eq!(winner.id, sell_b.id);
}

#[test]
fn custom_weights_can_flip_the_winner() {
    // With all weight on trust, a pricier but highly trusted seller beats
    // the cheapest one.
    let buyer = participant(1, 50, None);
    let trusted = participant(2, 100, None);
    let cheap = participant(3, 10, None);

    let mut buy = offer(1, OfferSide::Buy, "200.00", "5.000", 0);
    buy.weight_price = Some(0.0);
    buy.weight_distance = Some(0.0);
    buy.weight_trust = Some(1.0);

    let sell_trusted = offer(2, OfferSide::Sell, "195.00", "5.000", 1);
    let sell_cheap = offer(3, OfferSide::Sell, "150.00", "5.000", 2);

    let pool = vec![sell_cheap.clone(), sell_trusted.clone()];
    let bounds = SlackBounds::from_candidates(buy.price_per_kwh, &pool);
    let sellers: HashMap<i64, Participant> =
        [(2, trusted), (3, cheap)].into_iter().collect();

    let winner = select_best(&buy, &buyer, &pool, &sellers, bounds).unwrap();
    assert_eq!(winner.id, sell_trusted.id);
}

#[test]
fn declared_weight_bounds_reject_negatives() {
    use validator::Validate;

    let now = Utc::now();
    let start = now + Duration::minutes(5);
    let mut req = CreateOfferRequest {
        side: OfferSide::Buy,
        price_per_kwh: dec("200.00"),
        quantity_kwh: dec("5.000"),
        start_time: start,
        end_time: start + Duration::minutes(120),
        weight_price: Some(-0.2),
        weight_distance: None,
        weight_trust: None,
    };
    // Both the declarative request rules and the service check refuse it.
    assert!(req.validate().is_err());
    assert!(validate_offer_request(&req, now).is_err());

    req.weight_price = Some(0.2);
    assert!(req.validate().is_ok());
    assert!(validate_offer_request(&req, now).is_ok());
}

#[test]
fn overfill_band_allows_ten_percent_extra() {
    // A 5.000 kWh buy accepts sellers listing up to 5.500 kWh; anything the
    // seller listed beyond the executed quantity is released back.
    let buy_qty = dec("5.000");
    let cap = (buy_qty * energy_exchange::services::scoring::SELL_OVERFILL_RATIO)
        .round_dp(3);
    assert_eq!(cap, dec("5.500"));

    let seller_listed = dec("5.500");
    assert_eq!(seller_listed - buy_qty, dec("0.500"));
}

#[test]
fn weights_normalize_before_use() {
    let w = Weights::new(Some(3.0), Some(2.0), Some(5.0));
    assert!((w.price + w.distance + w.trust - 1.0).abs() < 1e-9);
    assert!((w.price - 0.3).abs() < 1e-9);
    assert!((w.trust - 0.5).abs() < 1e-9);
}

#[test]
fn empty_pool_selects_nothing() {
    let buyer = participant(1, 50, None);
    let buy = offer(1, OfferSide::Buy, "200.00", "5.000", 0);
    let sellers = HashMap::new();
    let bounds = SlackBounds::from_candidates(buy.price_per_kwh, &[]);

    assert!(rank_top_k(&buy, &buyer, &[], &sellers, bounds, LOCK_TOP_K).is_empty());
    assert!(select_best(&buy, &buyer, &[], &sellers, bounds).is_none());
}
