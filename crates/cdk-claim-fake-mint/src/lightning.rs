//! Fake lightning network shared by fake mints

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use cdk_claim_common::{Amount, Error};
use parking_lot::Mutex;

use crate::FakeMintInner;

#[derive(Debug)]
struct Invoice {
    amount_sat: Amount,
    paid: bool,
    mint: Weak<FakeMintInner>,
    quote_id: String,
}

/// In process lightning network
///
/// Invoices created by fake mints can be paid by tests or by another fake
/// mint melting ecash, which marks the receiving mint quote `PAID`.
#[derive(Debug, Clone, Default)]
pub struct FakeLightning {
    invoices: Arc<Mutex<HashMap<String, Invoice>>>,
}

impl FakeLightning {
    /// Create new [`FakeLightning`]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create_invoice(
        &self,
        mint: &Arc<FakeMintInner>,
        quote_id: &str,
        amount_sat: Amount,
    ) -> String {
        let request = format!(
            "lnbcrt{}n1fake{}",
            amount_sat.to_u64().saturating_mul(10),
            uuid::Uuid::new_v4().simple()
        );
        self.invoices.lock().insert(
            request.clone(),
            Invoice {
                amount_sat,
                paid: false,
                mint: Arc::downgrade(mint),
                quote_id: quote_id.to_string(),
            },
        );
        request
    }

    /// Amount of an invoice in sat
    pub fn invoice_amount(&self, request: &str) -> Option<Amount> {
        self.invoices.lock().get(request).map(|i| i.amount_sat)
    }

    /// Is the invoice paid
    pub fn is_paid(&self, request: &str) -> bool {
        self.invoices
            .lock()
            .get(request)
            .map(|i| i.paid)
            .unwrap_or(false)
    }

    /// Pay an invoice
    pub fn pay(&self, request: &str) -> Result<(), Error> {
        let (mint, quote_id) = {
            let mut invoices = self.invoices.lock();
            let invoice = invoices.get_mut(request).ok_or(Error::PaymentFailed)?;
            if invoice.paid {
                return Err(Error::PaymentFailed);
            }
            invoice.paid = true;
            (invoice.mint.upgrade(), invoice.quote_id.clone())
        };

        tracing::debug!("Fake lightning paid invoice for quote {}", quote_id);

        if let Some(mint) = mint {
            mint.mark_quote_paid(&quote_id);
        }
        Ok(())
    }
}
