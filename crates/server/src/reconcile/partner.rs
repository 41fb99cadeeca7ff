//! Customer partner resolution.
//!
//! Businesses are matched by VAT number, consumers by email. The partner name
//! of a business is always its legal name; the contact person who booked never
//! replaces it.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use booking_bridge_core::{
    CountryId, CountryStateId, Email, PartnerId, VatNumber, fiscal_code_for_partner,
};

use super::{ReconcileSettings, ResolveError, insert_some};
use crate::odoo::{
    OdooRpc, Reattach, Values, create_with_fallback, record_id, write_with_fallback,
};

/// Fields the Italian localization or the accounting module may not provide.
const OPTIONAL_FIELDS: &[&str] = &[
    "vat",
    "l10n_it_codice_fiscale",
    "l10n_it_pa_index",
    "l10n_it_pec_email",
    "customer_rank",
];

/// Postal address of a booking customer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    /// Province code (e.g. `RM`), resolved within the country.
    pub province: Option<String>,
    /// Two-letter country code.
    pub country: Option<String>,
}

impl Address {
    /// Single-line rendering used in order metadata.
    #[must_use]
    pub fn one_line(&self) -> Option<String> {
        let city = match (self.zip.as_deref(), self.city.as_deref()) {
            (Some(zip), Some(city)) => Some(format!("{zip} {city}")),
            (None, Some(city)) => Some(city.to_string()),
            (Some(zip), None) => Some(zip.to_string()),
            (None, None) => None,
        };
        let province = self.province.as_deref().map(|p| format!("({p})"));
        let parts: Vec<String> = [
            self.street.clone(),
            city,
            province,
            self.country.clone(),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

/// Customer identity collected at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerInput {
    pub email: String,
    /// Contact person.
    pub name: String,
    pub phone: Option<String>,
    pub fiscal_code: Option<String>,
    pub vat_number: Option<String>,
    /// Electronic invoicing recipient code.
    pub sdi_code: Option<String>,
    pub pec_email: Option<String>,
    pub company_name: Option<String>,
    pub address: Address,
    pub is_b2b: bool,
}

impl PartnerInput {
    /// Name stored on the partner: the company for businesses, else the person.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.is_b2b
            && let Some(company) = self.company_name.as_deref().map(str::trim)
            && !company.is_empty()
        {
            return company;
        }
        self.name.trim()
    }
}

/// A resolved customer partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPartner {
    pub id: PartnerId,
    /// Whether the partner was created by this call.
    pub created: bool,
    /// Optional fields the database rejected.
    pub skipped_fields: Vec<String>,
}

/// Find or create the customer partner and bring its details up to date.
///
/// # Errors
///
/// Returns `ResolveError::Validation` for a malformed email or VAT number and
/// `ResolveError::Odoo` when the search or the minimal create fails.
#[instrument(skip(rpc, input, settings), fields(email = %input.email, b2b = input.is_b2b))]
pub async fn resolve_partner(
    rpc: &dyn OdooRpc,
    input: &PartnerInput,
    settings: &ReconcileSettings,
) -> Result<ResolvedPartner, ResolveError> {
    let email = Email::parse(&input.email).map_err(|e| ResolveError::Validation(e.to_string()))?;
    let name = input.display_name();
    if name.is_empty() {
        return Err(ResolveError::Validation("partner name is required".to_string()));
    }

    let vat = match input.vat_number.as_deref().filter(|_| input.is_b2b) {
        Some(raw) if !raw.trim().is_empty() => Some(
            VatNumber::parse(raw, &settings.default_country)
                .map_err(|e| ResolveError::Validation(e.to_string()))?,
        ),
        _ => None,
    };

    let domain = match &vat {
        Some(vat) => json!(["|", ["vat", "=", vat.as_str()], ["vat", "=", vat.number()]]),
        None => json!([["email", "=ilike", email.as_str()]]),
    };
    let existing = rpc.search("res.partner", domain, Some(1)).await?;

    let country_code = vat
        .as_ref()
        .map(|vat| vat.iso_country().to_string())
        .or_else(|| input.address.country.clone())
        .unwrap_or_else(|| settings.default_country.clone());
    let country_id = resolve_country(rpc, &country_code, &settings.default_country).await;
    let state_id = match (country_id, input.address.province.as_deref()) {
        (Some(country), Some(province)) => resolve_state(rpc, country, province).await,
        _ => None,
    };

    let mut values = Values::new();
    values.insert("email".into(), json!(email.as_str()));
    values.insert("is_company".into(), json!(input.is_b2b));
    insert_some(&mut values, "phone", input.phone.as_deref());
    insert_some(&mut values, "street", input.address.street.as_deref());
    insert_some(&mut values, "city", input.address.city.as_deref());
    insert_some(&mut values, "zip", input.address.zip.as_deref());
    if let Some(country) = country_id {
        values.insert("country_id".into(), country.into());
    }
    if let Some(state) = state_id {
        values.insert("state_id".into(), state.into());
    }
    if let Some(vat) = &vat {
        values.insert("vat".into(), json!(vat.as_str()));
    }
    if let Some(code) = fiscal_code_for_partner(input.is_b2b, input.fiscal_code.as_deref(), vat.as_ref()) {
        values.insert("l10n_it_codice_fiscale".into(), json!(code));
    }
    if input.is_b2b {
        insert_some(&mut values, "l10n_it_pa_index", input.sdi_code.as_deref());
        insert_some(&mut values, "l10n_it_pec_email", input.pec_email.as_deref());
    }

    if let Some(&id) = existing.first() {
        if !input.is_b2b {
            values.insert("name".into(), json!(name));
        }
        let outcome =
            write_with_fallback(rpc, "res.partner", &[id], &values, OPTIONAL_FIELDS).await?;
        tracing::debug!(partner_id = id, skipped = ?outcome.skipped, "Updated partner");
        return Ok(ResolvedPartner {
            id: PartnerId::new(id),
            created: false,
            skipped_fields: outcome.skipped,
        });
    }

    values.insert("name".into(), json!(name));
    values.insert("customer_rank".into(), json!(1));
    let outcome = create_with_fallback(
        rpc,
        "res.partner",
        &values,
        OPTIONAL_FIELDS,
        Reattach::Individually,
    )
    .await?;
    tracing::info!(partner_id = outcome.id, degraded = outcome.degraded, "Created partner");

    Ok(ResolvedPartner {
        id: PartnerId::new(outcome.id),
        created: true,
        skipped_fields: outcome.skipped,
    })
}

/// Find or create a bare partner from email and name.
///
/// Used when full resolution fails, so the sale order still gets a customer.
///
/// # Errors
///
/// Returns `ResolveError::Odoo` if both the search and the create fail.
#[instrument(skip(rpc))]
pub async fn fallback_partner(
    rpc: &dyn OdooRpc,
    email: &str,
    name: &str,
) -> Result<PartnerId, ResolveError> {
    let email = email.trim();
    if !email.is_empty() {
        let found = rpc
            .search("res.partner", json!([["email", "=ilike", email]]), Some(1))
            .await?;
        if let Some(&id) = found.first() {
            return Ok(PartnerId::new(id));
        }
    }

    let name = if name.trim().is_empty() { email } else { name.trim() };
    let mut values = Values::new();
    values.insert("name".into(), json!(name));
    insert_some(&mut values, "email", Some(email));
    let id = rpc.create("res.partner", &values).await?;
    tracing::warn!(partner_id = id, "Created fallback partner");
    Ok(PartnerId::new(id))
}

/// Country id for `code`, falling back to `default_code`.
async fn resolve_country(rpc: &dyn OdooRpc, code: &str, default_code: &str) -> Option<CountryId> {
    let code = code.trim().to_ascii_uppercase();
    let default_code = default_code.to_ascii_uppercase();
    let mut candidates = vec![code];
    if !candidates.contains(&default_code) {
        candidates.push(default_code);
    }

    for candidate in candidates {
        match rpc
            .search("res.country", json!([["code", "=", candidate]]), Some(1))
            .await
        {
            Ok(ids) => {
                if let Some(&id) = ids.first() {
                    return Some(CountryId::new(id));
                }
                tracing::debug!(country = %candidate, "Country not found");
            }
            Err(e) => tracing::warn!(country = %candidate, error = %e, "Country lookup failed"),
        }
    }
    None
}

/// `res.country.state` id for a province code within `country`.
async fn resolve_state(
    rpc: &dyn OdooRpc,
    country: CountryId,
    province: &str,
) -> Option<CountryStateId> {
    let code = province.trim().to_ascii_uppercase();
    if code.is_empty() {
        return None;
    }
    let domain = json!([["country_id", "=", country.as_i64()], ["code", "=", code]]);
    match rpc
        .search_read("res.country.state", domain, &["id"], Some(1))
        .await
    {
        Ok(rows) => rows.first().and_then(record_id).map(CountryStateId::new),
        Err(e) => {
            tracing::warn!(province = %code, error = %e, "Province lookup failed");
            None
        }
    }
}
