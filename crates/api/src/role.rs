//! Which participant a process runs.

use std::fmt;
use std::str::FromStr;

use saga::steps::{ORDER_SERVICE, PAYMENT_SERVICE, SHIPPING_SERVICE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Order,
    Payment,
    Shipping,
}

impl Role {
    pub fn service_name(&self) -> &'static str {
        match self {
            Role::Order => ORDER_SERVICE,
            Role::Payment => PAYMENT_SERVICE,
            Role::Shipping => SHIPPING_SERVICE,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Role::Order => 3001,
            Role::Payment => 3002,
            Role::Shipping => 3003,
        }
    }

    /// Shipping keeps the coin flip the carrier integration started with.
    pub fn default_failure_rate(&self) -> f64 {
        match self {
            Role::Order | Role::Payment => 0.0,
            Role::Shipping => 0.5,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches("-service") {
            "order" => Ok(Role::Order),
            "payment" => Ok(Role::Payment),
            "shipping" => Ok(Role::Shipping),
            other => Err(format!("unknown role: {other}")),
        }
    }
}
