//! Synthetic transaction generation used to seed the source table.


use std::net::Ipv4Addr;
use std::num::NonZeroU32;

use chrono::{SubsecRound, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::models::{Currency, PaymentMethod, Transaction};
use crate::types::Amount;

const MIN_AMOUNT_CENTS: u32 = 1_000;
const MAX_AMOUNT_CENTS: u32 = 100_000;
const TIMESTAMP_PRECISION: u16 = 6;

const USER_NAMES: &[&str] = &["amartin", "bdupont", "cmoreau", "dlaurent", "esimon", "fmichel", "glefebvre", "hgarcia"];
const CITIES: &[(&str, &str)] = &[
    ("Paris", "France"),
    ("Lyon", "France"),
    ("Berlin", "Germany"),
    ("Madrid", "Spain"),
    ("Lisbon", "Portugal"),
    ("New York", "United States"),
    ("Toronto", "Canada"),
    ("Dublin", "Ireland"),
];
const MERCHANTS: &[&str] = &["Acme Corp", "Globex", "Initech", "Umbrella Retail", "Stark Supplies", "Wayne Foods"];
const VOUCHER_CODES: &[&str] = &["", "DISCOUNT10", ""];

pub fn generate_transaction<R: Rng + ?Sized>(rng: &mut R) -> Transaction {
    let (city, country) = CITIES.choose(rng).copied().unwrap_or(("Paris", "France"));
    let cents = NonZeroU32::new(rng.gen_range(MIN_AMOUNT_CENTS..=MAX_AMOUNT_CENTS)).unwrap_or(NonZeroU32::MIN);

    Transaction {
        transaction_id: Uuid::new_v4().to_string(),
        user_id: USER_NAMES.choose(rng).copied().unwrap_or("anonymous").to_string(),
        timestamp: Utc::now().trunc_subsecs(TIMESTAMP_PRECISION),
        amount: Amount::from_cents(cents),
        currency: *Currency::ALL.choose(rng).unwrap_or(&Currency::Eur),
        city: city.to_string(),
        country: country.to_string(),
        merchant_name: MERCHANTS.choose(rng).copied().unwrap_or("Acme Corp").to_string(),
        payment_method: *PaymentMethod::ALL.choose(rng).unwrap_or(&PaymentMethod::CreditCard),
        ip_address: Ipv4Addr::new(rng.gen_range(1..=223), rng.r#gen(), rng.r#gen(), rng.gen_range(1..=254)),
        voucher_code: VOUCHER_CODES.choose(rng).copied().unwrap_or("").to_string(),
        affiliate_id: Uuid::new_v4().to_string()
    }
}

pub fn generate_batch(count: usize) -> Vec<Transaction> {
    let mut rng = rand::thread_rng();

    (0..count).map(|_| generate_transaction(&mut rng)).collect()
}
