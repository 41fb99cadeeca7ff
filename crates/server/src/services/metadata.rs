//! Booking metadata carried on checkout sessions and payment intents.
//!
//! Checkout writes these keys to both the session and its payment intent;
//! the webhook reads them back from the intent and, when required keys or
//! tax identifiers are missing, from the session.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use uuid::Uuid;

use booking_bridge_core::ProductType;

use crate::payments::NormalizedCheckoutSession;
use crate::reconcile::{Address, PartnerInput};

/// Keys the webhook cannot reconcile without.
pub const REQUIRED_KEYS: &[&str] = &["order_number", "product_id", "customer_email", "guests"];

/// Alternative custom-field keys accepted from hosted checkout forms.
const CUSTOM_FIELD_ALIASES: &[(&str, &str)] = &[
    ("codice_fiscale", "fiscal_code"),
    ("codicefiscale", "fiscal_code"),
    ("partita_iva", "vat_number"),
    ("partitaiva", "vat_number"),
    ("vat", "vat_number"),
    ("codice_sdi", "sdi_code"),
    ("pec", "pec_email"),
    ("ragione_sociale", "company_name"),
];

macro_rules! booking_metadata {
    ($($field:ident),* $(,)?) => {
        /// Booking details keyed by their metadata names.
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct BookingMetadata {
            $(pub $field: Option<String>,)*
        }

        impl BookingMetadata {
            /// Read from a metadata map. Blank values count as missing.
            #[must_use]
            pub fn from_map<S: std::hash::BuildHasher>(map: &HashMap<String, String, S>) -> Self {
                Self {
                    $($field: non_blank(map.get(stringify!($field)).map(String::as_str)),)*
                }
            }

            /// Metadata map with every present key.
            #[must_use]
            pub fn to_map(&self) -> BTreeMap<String, String> {
                let mut map = BTreeMap::new();
                $(
                    if let Some(value) = &self.$field {
                        map.insert(stringify!($field).to_string(), value.clone());
                    }
                )*
                map
            }

            /// Fill missing keys from `other`. Present keys are kept.
            pub fn fill_from(&mut self, other: &Self) {
                $(
                    if self.$field.is_none() {
                        self.$field.clone_from(&other.$field);
                    }
                )*
            }

            fn set_if_missing(&mut self, key: &str, value: &str) {
                let value = non_blank(Some(value));
                match key {
                    $(stringify!($field) => {
                        if self.$field.is_none() {
                            self.$field = value;
                        }
                    })*
                    _ => {}
                }
            }
        }
    };
}

booking_metadata!(
    order_number,
    product_id,
    product_type,
    product_name,
    availability_slot_id,
    booking_date,
    time_slot,
    guests,
    dogs,
    customer_email,
    customer_name,
    customer_phone,
    is_b2b,
    company_name,
    vat_number,
    fiscal_code,
    sdi_code,
    pec_email,
    street,
    city,
    zip,
    province,
    country,
);

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl BookingMetadata {
    /// Required keys that are absent.
    #[must_use]
    pub fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| match *key {
                "order_number" => self.order_number.is_none(),
                "product_id" => self.product_id.is_none(),
                "customer_email" => self.customer_email.is_none(),
                "guests" => self.guests.is_none(),
                _ => false,
            })
            .collect()
    }

    /// No tax identifier is present, or a business booking lacks its
    /// company name or VAT number.
    #[must_use]
    pub fn missing_tax_identity(&self) -> bool {
        let no_tax_id = self.fiscal_code.is_none() && self.vat_number.is_none();
        let incomplete_b2b =
            self.is_b2b() && (self.company_name.is_none() || self.vat_number.is_none());
        no_tax_id || incomplete_b2b
    }

    /// Enrich from a checkout session: its metadata, then the customer
    /// identity, then custom form fields.
    pub fn enrich_from_session(&mut self, session: &NormalizedCheckoutSession) {
        self.fill_from(&Self::from_map(&session.metadata));

        let customer = &session.customer;
        for (key, value) in [
            ("customer_email", &customer.email),
            ("customer_name", &customer.name),
            ("customer_phone", &customer.phone),
        ] {
            if let Some(value) = value {
                self.set_if_missing(key, value);
            }
        }

        for (key, value) in &session.custom_fields {
            let key = key.to_ascii_lowercase();
            let key = CUSTOM_FIELD_ALIASES
                .iter()
                .find(|(alias, _)| *alias == key)
                .map_or(key.as_str(), |(_, canonical)| *canonical);
            self.set_if_missing(key, value);
        }
    }

    #[must_use]
    pub fn product_uuid(&self) -> Option<Uuid> {
        self.product_id.as_deref().and_then(|id| Uuid::parse_str(id).ok())
    }

    #[must_use]
    pub fn slot_uuid(&self) -> Option<Uuid> {
        self.availability_slot_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    /// Product type, defaulting to an experience.
    #[must_use]
    pub fn product_type(&self) -> ProductType {
        self.product_type
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn guests(&self) -> Option<u32> {
        self.guests.as_deref().and_then(|g| g.parse().ok())
    }

    /// Dogs, zero when absent or unparseable.
    #[must_use]
    pub fn dogs(&self) -> u32 {
        self.dogs
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn booking_date(&self) -> Option<NaiveDate> {
        self.booking_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    }

    #[must_use]
    pub fn is_b2b(&self) -> bool {
        self.is_b2b
            .as_deref()
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
    }

    #[must_use]
    pub fn address(&self) -> Address {
        Address {
            street: self.street.clone(),
            city: self.city.clone(),
            zip: self.zip.clone(),
            province: self.province.clone(),
            country: self.country.clone(),
        }
    }

    /// Partner resolver input for the paying customer.
    #[must_use]
    pub fn partner_input(&self, email: &str) -> PartnerInput {
        PartnerInput {
            email: email.to_string(),
            name: self.customer_name.clone().unwrap_or_default(),
            phone: self.customer_phone.clone(),
            fiscal_code: self.fiscal_code.clone(),
            vat_number: self.vat_number.clone(),
            sdi_code: self.sdi_code.clone(),
            pec_email: self.pec_email.clone(),
            company_name: self.company_name.clone(),
            address: self.address(),
            is_b2b: self.is_b2b(),
        }
    }
}
