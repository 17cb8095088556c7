use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::payment::{GatewayCheckout, GatewayVerification};
use crate::signature;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Payment gateway unreachable: {0}")]
    Unreachable(String),
    #[error("Payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Payment gateway timed out after {0} ms")]
    Timeout(u64),
    #[error("Payment gateway returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeTransaction {
    pub email: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub reference: String,
    pub callback_url: Option<String>,
    pub metadata: serde_json::Value,
}

/// The two opaque gateway operations plus webhook signature validation.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> &str;

    async fn initialize_transaction(
        &self,
        request: &InitializeTransaction,
    ) -> Result<GatewayCheckout, GatewayError>;

    async fn verify_transaction(&self, reference: &str) -> Result<GatewayVerification, GatewayError>;

    fn validate_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool;
}

/// Local gateway stand-in: remembers initialized transactions and reports them
/// as successful unless an outcome was scripted for the reference.
pub struct SandboxGateway {
    secret: String,
    checkout_base_url: String,
    initialized: Mutex<HashMap<String, InitializeTransaction>>,
    scripted: Mutex<HashMap<String, GatewayVerification>>,
    fail_initialize: AtomicBool,
    verify_calls: AtomicUsize,
}

impl SandboxGateway {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            checkout_base_url: "https://checkout.sandbox.local".to_string(),
            initialized: Mutex::new(HashMap::new()),
            scripted: Mutex::new(HashMap::new()),
            fail_initialize: AtomicBool::new(false),
            verify_calls: AtomicUsize::new(0),
        }
    }

    /// Makes subsequent initialize calls fail as if the gateway were down.
    pub fn set_fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    /// Overrides what `verify_transaction` reports for a reference.
    pub fn script_outcome(&self, verification: GatewayVerification) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.insert(verification.reference.clone(), verification);
        }
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn initialized(&self, reference: &str) -> Option<InitializeTransaction> {
        self.initialized
            .lock()
            .ok()
            .and_then(|m| m.get(reference).cloned())
    }

    /// Signs a webhook body the way the real gateway does.
    pub fn sign(&self, raw_body: &[u8]) -> String {
        signature::sign_hex(self.secret.as_bytes(), raw_body)
    }

    /// A successful `charge.success` verification for an initialized reference.
    pub fn success_for(&self, reference: &str) -> Option<GatewayVerification> {
        self.initialized(reference).map(|tx| GatewayVerification {
            reference: tx.reference.clone(),
            status: "success".to_string(),
            amount_minor_units: tx.amount_minor_units,
            currency: tx.currency.clone(),
            raw: serde_json::json!({
                "reference": tx.reference,
                "status": "success",
                "amount": tx.amount_minor_units,
                "currency": tx.currency,
            }),
        })
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn provider(&self) -> &str {
        "sandbox"
    }

    async fn initialize_transaction(
        &self,
        request: &InitializeTransaction,
    ) -> Result<GatewayCheckout, GatewayError> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(GatewayError::Unreachable("sandbox initialize disabled".to_string()));
        }

        let access_code = format!("ac_{}", &request.reference);
        let checkout = GatewayCheckout {
            authorization_url: format!("{}/{}", self.checkout_base_url, access_code),
            access_code: access_code.clone(),
            raw: serde_json::json!({
                "status": true,
                "data": {
                    "reference": request.reference,
                    "access_code": access_code,
                }
            }),
        };

        self.initialized
            .lock()
            .map_err(|_| GatewayError::InvalidResponse("sandbox state poisoned".to_string()))?
            .insert(request.reference.clone(), request.clone());

        Ok(checkout)
    }

    async fn verify_transaction(&self, reference: &str) -> Result<GatewayVerification, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self
            .scripted
            .lock()
            .map_err(|_| GatewayError::InvalidResponse("sandbox state poisoned".to_string()))?
            .get(reference)
            .cloned();
        if let Some(verification) = scripted {
            return Ok(verification);
        }

        self.success_for(reference).ok_or_else(|| GatewayError::Rejected {
            status: 404,
            message: format!("Transaction reference not found: {}", reference),
        })
    }

    fn validate_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        signature::verify_hex(self.secret.as_bytes(), raw_body, signature)
    }
}
