//! Resource demand aggregation and node-count sizing.
//!
//! Kubernetes quantities are parsed once at the watch boundary into whole
//! millicores and bytes. Everything else in this module is plain arithmetic
//! over those numbers.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::error::{Error, Result};

const CPU: &str = "cpu";
const MEMORY: &str = "memory";

/// Parse a Kubernetes quantity and scale it by `factor`, rounding up.
///
/// Accepts decimal SI suffixes (`n`, `u`, `m`, `k`, `M`, `G`, `T`, `P`, `E`),
/// binary suffixes (`Ki` .. `Ei`) and decimal exponents (`1e3`, `5E-3`).
/// Like the API server, a fractional result is rounded up to the next whole
/// unit, so `1.5` bytes is 2 bytes and `0.1m` CPU is 1 millicore.
fn parse_scaled(raw: &str, factor: i128) -> Result<u64> {
    let invalid = |reason: &str| Error::Quantity {
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let s = raw.trim();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let number_len = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(number_len);

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("missing number"));
    }
    if fraction.contains('.') {
        return Err(invalid("more than one decimal point"));
    }

    let digits = format!("{whole}{fraction}");
    let mantissa: i128 = digits
        .trim_start_matches('0')
        .parse::<i128>()
        .or_else(|e| {
            if digits.chars().all(|c| c == '0') {
                Ok(0)
            } else {
                Err(e)
            }
        })
        .map_err(|_| invalid("number out of range"))?;
    let fraction_digits =
        u32::try_from(fraction.len()).map_err(|_| invalid("too many digits"))?;

    let (binary_shift, decimal_exp): (u32, i32) = match suffix {
        "" => (0, 0),
        "Ki" => (10, 0),
        "Mi" => (20, 0),
        "Gi" => (30, 0),
        "Ti" => (40, 0),
        "Pi" => (50, 0),
        "Ei" => (60, 0),
        "n" => (0, -9),
        "u" => (0, -6),
        "m" => (0, -3),
        "k" => (0, 3),
        "M" => (0, 6),
        "G" => (0, 9),
        "T" => (0, 12),
        "P" => (0, 15),
        "E" => (0, 18),
        s if s.starts_with('e') || s.starts_with('E') => {
            let exp = s[1..].parse::<i32>().map_err(|_| invalid("bad exponent"))?;
            (0, exp)
        }
        _ => return Err(invalid("unknown suffix")),
    };

    if negative && mantissa != 0 {
        return Err(invalid("negative quantity"));
    }

    let pow10 = |exp: u32| {
        10_i128
            .checked_pow(exp)
            .ok_or_else(|| invalid("exponent out of range"))
    };

    let scale_up =
        u32::try_from(decimal_exp.max(0)).map_err(|_| invalid("exponent out of range"))?;
    let scale_down = u32::try_from(decimal_exp.saturating_neg().max(0))
        .ok()
        .and_then(|exp| exp.checked_add(fraction_digits))
        .ok_or_else(|| invalid("exponent out of range"))?;

    let numerator = mantissa
        .checked_mul(factor)
        .and_then(|n| n.checked_mul(1_i128 << binary_shift))
        .and_then(|n| pow10(scale_up).ok().and_then(|p| n.checked_mul(p)))
        .ok_or_else(|| invalid("value out of range"))?;
    let denominator = pow10(scale_down)?;

    let value = numerator / denominator + i128::from(numerator % denominator != 0);
    u64::try_from(value).map_err(|_| invalid("value out of range"))
}

/// Integer value of a quantity, rounded up (bytes for memory).
pub fn quantity_value(quantity: &Quantity) -> Result<u64> {
    parse_scaled(&quantity.0, 1)
}

/// Quantity in thousandths, rounded up (millicores for CPU).
pub fn quantity_millis(quantity: &Quantity) -> Result<u64> {
    parse_scaled(&quantity.0, 1000)
}

/// Parse a human-readable memory size such as `28Gi` into bytes.
pub fn parse_memory(raw: &str) -> Result<u64> {
    parse_scaled(raw, 1)
}

/// Requests and limits of one container, resolved to numbers.
///
/// Absent entries are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerResources {
    pub cpu_request_millis: u64,
    pub cpu_limit_millis: u64,
    pub memory_request_bytes: u64,
    pub memory_limit_bytes: u64,
}

impl ContainerResources {
    /// Resolve a container's resource requirements.
    pub fn from_requirements(requirements: Option<&ResourceRequirements>) -> Result<Self> {
        let Some(requirements) = requirements else {
            return Ok(Self::default());
        };

        let lookup = |map: Option<&BTreeMap<String, Quantity>>, name: &str, millis: bool| {
            map.and_then(|m| m.get(name)).map_or(Ok(0), |q| {
                if millis {
                    quantity_millis(q)
                } else {
                    quantity_value(q)
                }
            })
        };

        Ok(Self {
            cpu_request_millis: lookup(requirements.requests.as_ref(), CPU, true)?,
            cpu_limit_millis: lookup(requirements.limits.as_ref(), CPU, true)?,
            memory_request_bytes: lookup(requirements.requests.as_ref(), MEMORY, false)?,
            memory_limit_bytes: lookup(requirements.limits.as_ref(), MEMORY, false)?,
        })
    }

    /// Whole cores this container needs: the limit when set, else the request.
    ///
    /// Sub-core amounts are truncated, so 1500m counts as one core.
    #[must_use]
    pub fn effective_cpu_cores(&self) -> u64 {
        let millis = if self.cpu_limit_millis > 0 {
            self.cpu_limit_millis
        } else {
            self.cpu_request_millis
        };
        millis / 1000
    }

    /// Bytes this container needs: the limit when set, else the request.
    #[must_use]
    pub fn effective_memory_bytes(&self) -> u64 {
        if self.memory_limit_bytes > 0 {
            self.memory_limit_bytes
        } else {
            self.memory_request_bytes
        }
    }

    /// Effective demand of this container.
    #[must_use]
    pub fn demand(&self) -> ResourceTotals {
        ResourceTotals {
            cpu_cores: self.effective_cpu_cores(),
            memory_bytes: self.effective_memory_bytes(),
        }
    }
}

/// Aggregate CPU and memory demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceTotals {
    pub cpu_cores: u64,
    pub memory_bytes: u64,
}

impl Add for ResourceTotals {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            cpu_cores: self.cpu_cores.saturating_add(rhs.cpu_cores),
            memory_bytes: self.memory_bytes.saturating_add(rhs.memory_bytes),
        }
    }
}

impl AddAssign for ResourceTotals {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for ResourceTotals {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Sum the effective demand of every container.
pub fn total_demand<'a, I>(containers: I) -> ResourceTotals
where
    I: IntoIterator<Item = &'a ContainerResources>,
{
    containers.into_iter().map(ContainerResources::demand).sum()
}

/// Nodes of `per_node_bytes` memory needed to hold `total_bytes`, rounded up.
///
/// `per_node_bytes` must be non-zero; configuration validation guarantees it.
#[must_use]
pub fn nodes_needed(total_bytes: u64, per_node_bytes: u64) -> u64 {
    debug_assert!(per_node_bytes > 0, "memory standard must be non-zero");
    total_bytes / per_node_bytes + u64::from(total_bytes % per_node_bytes > 0)
}
