//! Proptest generators for property-based testing.

use proptest::prelude::*;

use keyledger_core::{
    AccountId, CoarseDate, EncryptedRecord, EncryptionUnit, PeriodLabel, RecordCodec, RecordId,
    RootSecret, Scope, Session,
};

/// Generate a random root secret.
pub fn root_secret() -> impl Strategy<Value = RootSecret> {
    any::<[u8; 32]>().prop_map(|bytes| {
        RootSecret::from_bytes(bytes.to_vec()).expect("32 bytes is a valid secret")
    })
}

/// Generate a random RecordId.
pub fn record_id() -> impl Strategy<Value = RecordId> {
    any::<[u8; 16]>().prop_map(RecordId::from_bytes)
}

/// Generate a scope.
pub fn scope() -> impl Strategy<Value = Scope> {
    prop::sample::select(Scope::ALL.to_vec())
}

/// Generate a quarter between 2000 and 2099.
pub fn period_label() -> impl Strategy<Value = PeriodLabel> {
    (2000u16..2100, 1u8..=4).prop_map(|(y, q)| PeriodLabel::new(y, q).expect("valid quarter"))
}

/// Generate a date inside `period`.
pub fn date_in(period: PeriodLabel) -> impl Strategy<Value = CoarseDate> {
    let first_month = (period.quarter() - 1) * 3 + 1;
    (first_month..first_month + 3, 1u8..=28).prop_map(move |(m, d)| {
        CoarseDate::new(period.year(), m, d).expect("day 1-28 exists in every month")
    })
}

/// Generate a valid unit: temporal scopes get a period, the rest none.
pub fn encryption_unit() -> impl Strategy<Value = EncryptionUnit> {
    (scope(), period_label()).prop_map(|(scope, period)| {
        let period = scope.is_temporal().then_some(period);
        EncryptionUnit::new(scope, period).expect("period matches scope")
    })
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Parameters for generating a record.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub secret: [u8; 32],
    pub record_id: RecordId,
    pub unit: EncryptionUnit,
    pub record_date: Option<CoarseDate>,
    pub payload: Vec<u8>,
    pub created_at: i64,
}

impl Arbitrary for RecordParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            record_id(),
            encryption_unit(),
            payload(1000),
            0i64..=1_900_000_000_000i64,
            any::<bool>(),
        )
            .prop_flat_map(|(secret, record_id, unit, payload, created_at, dated)| {
                let date = match unit.period() {
                    Some(period) if dated => date_in(period).prop_map(Some).boxed(),
                    _ => Just(None).boxed(),
                };
                date.prop_map(move |record_date| RecordParams {
                    secret,
                    record_id,
                    unit,
                    record_date,
                    payload: payload.clone(),
                    created_at,
                })
            })
            .boxed()
    }
}

impl RecordParams {
    /// A session unlocked with this record's secret.
    pub fn session(&self) -> Session {
        Session::unlock(
            AccountId::new("prop"),
            RootSecret::from_bytes(self.secret.to_vec()).expect("32 bytes is a valid secret"),
        )
    }
}

/// Encrypt a record from parameters with the default codec.
pub fn record_from_params(params: &RecordParams) -> EncryptedRecord {
    let session = params.session();
    let key = session.unit_key(&params.unit).expect("session is unlocked");
    let envelope = RecordCodec::default()
        .encrypt(&key, &params.payload, 0)
        .expect("wide nonces have no budget");
    EncryptedRecord::new(
        params.record_id,
        session.account_id().clone(),
        params.unit,
        params.record_date,
        envelope,
        params.created_at,
    )
}
