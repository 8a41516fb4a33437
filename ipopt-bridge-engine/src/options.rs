//   Copyright 2018 Egor Larionov
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.

//! Typed registry of the options understood by the engine.
//!
//! Every keyword has a fixed type and a validity check. Writing a value of the wrong type or
//! outside the valid range fails and leaves the stored value untouched.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Num(f64),
    Int(i32),
    Str(String),
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum OptionError {
    #[error("unknown option \"{0}\"")]
    Unknown(String),
    #[error("option \"{keyword}\" expects a {expected} value")]
    WrongType {
        keyword: String,
        expected: &'static str,
    },
    #[error("value {value} is not valid for option \"{keyword}\"")]
    InvalidValue { keyword: String, value: String },
}

enum Kind {
    Num {
        default: f64,
        valid: fn(f64) -> bool,
    },
    Int {
        default: i32,
        min: i32,
        max: i32,
    },
    /// An empty list of choices accepts any string.
    Str {
        default: &'static str,
        choices: &'static [&'static str],
    },
}

struct OptionDef {
    keyword: &'static str,
    kind: Kind,
}

fn positive(v: f64) -> bool {
    v > 0.0
}

fn not_nan(v: f64) -> bool {
    !v.is_nan()
}

fn nonzero(v: f64) -> bool {
    v != 0.0 && v.is_finite()
}

fn half_fraction(v: f64) -> bool {
    v > 0.0 && v <= 0.5
}

const YES_NO: &[&str] = &["yes", "no"];

const DEFINITIONS: &[OptionDef] = &[
    OptionDef { keyword: "tol", kind: Kind::Num { default: 1e-8, valid: positive } },
    OptionDef { keyword: "acceptable_tol", kind: Kind::Num { default: 1e-6, valid: positive } },
    OptionDef { keyword: "acceptable_iter", kind: Kind::Int { default: 15, min: 0, max: i32::MAX } },
    OptionDef { keyword: "constr_viol_tol", kind: Kind::Num { default: 1e-4, valid: positive } },
    OptionDef { keyword: "dual_inf_tol", kind: Kind::Num { default: 1.0, valid: positive } },
    OptionDef { keyword: "compl_inf_tol", kind: Kind::Num { default: 1e-4, valid: positive } },
    OptionDef { keyword: "max_iter", kind: Kind::Int { default: 3000, min: 0, max: i32::MAX } },
    OptionDef { keyword: "max_cpu_time", kind: Kind::Num { default: 1e6, valid: positive } },
    OptionDef { keyword: "mu_init", kind: Kind::Num { default: 0.1, valid: positive } },
    OptionDef {
        keyword: "mu_strategy",
        kind: Kind::Str { default: "monotone", choices: &["monotone", "adaptive"] },
    },
    OptionDef { keyword: "bound_push", kind: Kind::Num { default: 1e-2, valid: positive } },
    OptionDef { keyword: "bound_frac", kind: Kind::Num { default: 1e-2, valid: half_fraction } },
    OptionDef { keyword: "bound_mult_init_val", kind: Kind::Num { default: 1.0, valid: positive } },
    OptionDef { keyword: "nlp_lower_bound_inf", kind: Kind::Num { default: -1e19, valid: not_nan } },
    OptionDef { keyword: "nlp_upper_bound_inf", kind: Kind::Num { default: 1e19, valid: not_nan } },
    OptionDef {
        keyword: "nlp_scaling_method",
        kind: Kind::Str {
            default: "gradient-based",
            choices: &["none", "user-scaling", "gradient-based"],
        },
    },
    OptionDef { keyword: "nlp_scaling_max_gradient", kind: Kind::Num { default: 100.0, valid: positive } },
    OptionDef { keyword: "obj_scaling_factor", kind: Kind::Num { default: 1.0, valid: nonzero } },
    OptionDef {
        keyword: "hessian_approximation",
        kind: Kind::Str { default: "exact", choices: &["exact", "limited-memory"] },
    },
    OptionDef { keyword: "warm_start_init_point", kind: Kind::Str { default: "no", choices: YES_NO } },
    OptionDef { keyword: "warm_start_bound_push", kind: Kind::Num { default: 1e-3, valid: positive } },
    OptionDef {
        keyword: "warm_start_mult_bound_push",
        kind: Kind::Num { default: 1e-3, valid: positive },
    },
    OptionDef { keyword: "diverging_iterates_tol", kind: Kind::Num { default: 1e20, valid: positive } },
    OptionDef { keyword: "print_level", kind: Kind::Int { default: 5, min: 0, max: 12 } },
    OptionDef { keyword: "file_print_level", kind: Kind::Int { default: 5, min: 0, max: 12 } },
    OptionDef { keyword: "output_file", kind: Kind::Str { default: "", choices: &[] } },
    OptionDef { keyword: "sb", kind: Kind::Str { default: "no", choices: YES_NO } },
];

fn lookup(keyword: &str) -> Option<&'static OptionDef> {
    DEFINITIONS.iter().find(|s| s.keyword == keyword)
}

/// Values set on one problem. Unset options read as their defaults.
#[derive(Clone, Debug, Default)]
pub struct OptionsList {
    values: HashMap<&'static str, OptionValue>,
}

impl OptionsList {
    pub fn new() -> Self {
        OptionsList::default()
    }

    pub fn set_num(&mut self, keyword: &str, value: f64) -> Result<(), OptionError> {
        let def = lookup(keyword).ok_or_else(|| OptionError::Unknown(keyword.to_string()))?;
        match def.kind {
            Kind::Num { valid, .. } => {
                if !valid(value) {
                    return Err(OptionError::InvalidValue {
                        keyword: keyword.to_string(),
                        value: value.to_string(),
                    });
                }
                self.values.insert(def.keyword, OptionValue::Num(value));
                Ok(())
            }
            _ => Err(wrong_type(def)),
        }
    }

    pub fn set_int(&mut self, keyword: &str, value: i32) -> Result<(), OptionError> {
        let def = lookup(keyword).ok_or_else(|| OptionError::Unknown(keyword.to_string()))?;
        match def.kind {
            Kind::Int { min, max, .. } => {
                if value < min || value > max {
                    return Err(OptionError::InvalidValue {
                        keyword: keyword.to_string(),
                        value: value.to_string(),
                    });
                }
                self.values.insert(def.keyword, OptionValue::Int(value));
                Ok(())
            }
            _ => Err(wrong_type(def)),
        }
    }

    pub fn set_str(&mut self, keyword: &str, value: &str) -> Result<(), OptionError> {
        let def = lookup(keyword).ok_or_else(|| OptionError::Unknown(keyword.to_string()))?;
        match def.kind {
            Kind::Str { choices, .. } => {
                let value = if choices.is_empty() {
                    value.to_string()
                } else {
                    // Choices compare case insensitively.
                    let lower = value.to_ascii_lowercase();
                    if !choices.contains(&lower.as_str()) {
                        return Err(OptionError::InvalidValue {
                            keyword: keyword.to_string(),
                            value: value.to_string(),
                        });
                    }
                    lower
                };
                self.values.insert(def.keyword, OptionValue::Str(value));
                Ok(())
            }
            _ => Err(wrong_type(def)),
        }
    }

    pub fn num(&self, keyword: &str) -> f64 {
        match self.values.get(keyword) {
            Some(OptionValue::Num(v)) => *v,
            _ => match lookup(keyword).map(|s| &s.kind) {
                Some(Kind::Num { default, .. }) => *default,
                _ => f64::NAN,
            },
        }
    }

    pub fn int(&self, keyword: &str) -> i32 {
        match self.values.get(keyword) {
            Some(OptionValue::Int(v)) => *v,
            _ => match lookup(keyword).map(|s| &s.kind) {
                Some(Kind::Int { default, .. }) => *default,
                _ => 0,
            },
        }
    }

    pub fn str(&self, keyword: &str) -> &str {
        match self.values.get(keyword) {
            Some(OptionValue::Str(v)) => v.as_str(),
            _ => match lookup(keyword).map(|s| &s.kind) {
                Some(Kind::Str { default, .. }) => *default,
                _ => "",
            },
        }
    }

    /// Options explicitly set by the user, in keyword order.
    pub fn user_values(&self) -> Vec<(&'static str, &OptionValue)> {
        let mut values: Vec<_> = self.values.iter().map(|(k, v)| (*k, v)).collect();
        values.sort_by_key(|(k, _)| *k);
        values
    }
}

fn wrong_type(def: &OptionDef) -> OptionError {
    let expected = match def.kind {
        Kind::Num { .. } => "numeric",
        Kind::Int { .. } => "integer",
        Kind::Str { .. } => "string",
    };
    OptionError::WrongType {
        keyword: def.keyword.to_string(),
        expected,
    }
}
