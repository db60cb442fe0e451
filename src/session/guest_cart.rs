use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

/// Session key holding the guest cart
pub const GUEST_CART_KEY: &str = "guest_cart";

/// Guest cart as stored in the session: `{"<product-id>": {"quantity": n}}`.
///
/// The raw map is kept as-is so entries written by older clients survive a
/// round trip; readers go through [`GuestCart::lines`], which skips anything
/// that does not describe a positive quantity of a well-formed product id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuestCart {
    entries: Map<String, Value>,
}

impl GuestCart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-object values are treated as an empty cart.
    pub fn from_value(value: Option<Value>) -> Self {
        match value {
            Some(Value::Object(entries)) => Self { entries },
            Some(other) => {
                debug!("Ignoring malformed guest cart payload: {}", other);
                Self::default()
            }
            None => Self::default(),
        }
    }

    /// Valid `(product_id, quantity)` pairs, ordered by product id.
    pub fn lines(&self) -> Vec<(Uuid, i32)> {
        self.entries
            .iter()
            .filter_map(|(key, entry)| {
                let product_id = match Uuid::parse_str(key) {
                    Ok(id) => id,
                    Err(_) => {
                        debug!(key = %key, "Skipping guest cart entry with malformed product id");
                        return None;
                    }
                };
                match parse_quantity(entry) {
                    Some(quantity) => Some((product_id, quantity)),
                    None => {
                        debug!(product_id = %product_id, "Skipping guest cart entry with unusable quantity");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn quantity_of(&self, product_id: Uuid) -> i32 {
        self.entries
            .get(&product_id.to_string())
            .and_then(parse_quantity)
            .unwrap_or(0)
    }

    pub fn set_quantity(&mut self, product_id: Uuid, quantity: i32) {
        self.entries
            .insert(product_id.to_string(), json!({ "quantity": quantity }));
    }

    /// Returns whether an entry was present.
    pub fn remove(&mut self, product_id: Uuid) -> bool {
        self.entries.remove(&product_id.to_string()).is_some()
    }

    /// True when no entry yields a usable line.
    pub fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.entries)
    }
}

fn parse_quantity(entry: &Value) -> Option<i32> {
    let raw = entry.get("quantity")?;
    let quantity = match raw {
        Value::Number(n) => n.as_i64().and_then(|q| i32::try_from(q).ok())?,
        Value::String(s) => s.trim().parse::<i32>().ok()?,
        _ => return None,
    };
    (quantity > 0).then_some(quantity)
}
