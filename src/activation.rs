use std::fmt;
use std::str::FromStr;

use crate::error::LfdaeError;
use crate::Flt;

const SELU_ALPHA: Flt = 1.673_263_2;
const SELU_SCALE: Flt = 1.050_701;

/// Elementwise nonlinearities selectable by name.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Activation {
    Identity,
    Relu,
    Relu6,
    Elu,
    Selu,
    Softplus,
    Sigmoid,
    Tanh,
}

impl Activation {
    /// Every name `lookup` accepts, in the order the CLI lists them.
    pub const NAMES: [&'static str; 8] = [
        "identity", "relu", "relu6", "elu", "selu", "softplus", "sigmoid", "tanh",
    ];

    pub fn lookup(name: &str) -> Result<Activation, LfdaeError> {
        name.parse()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Activation::Identity => "identity",
            Activation::Relu => "relu",
            Activation::Relu6 => "relu6",
            Activation::Elu => "elu",
            Activation::Selu => "selu",
            Activation::Softplus => "softplus",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
        }
    }

    #[inline(always)]
    pub fn apply(&self, x: Flt) -> Flt {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.max(0.0),
            Activation::Relu6 => x.clamp(0.0, 6.0),
            Activation::Elu => {
                if x > 0.0 {
                    x
                } else {
                    x.exp_m1()
                }
            }
            Activation::Selu => {
                if x > 0.0 {
                    SELU_SCALE * x
                } else {
                    SELU_SCALE * SELU_ALPHA * x.exp_m1()
                }
            }
            Activation::Softplus => softplus(x),
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
        }
    }

    /// d f(x) / dx, given both the input `x` and the already computed `y = f(x)`.
    #[inline(always)]
    pub fn derivative(&self, x: Flt, y: Flt) -> Flt {
        match self {
            Activation::Identity => 1.0,
            Activation::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Relu6 => {
                if x > 0.0 && x < 6.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Elu => {
                if x > 0.0 {
                    1.0
                } else {
                    y + 1.0
                }
            }
            Activation::Selu => {
                if x > 0.0 {
                    SELU_SCALE
                } else {
                    y + SELU_SCALE * SELU_ALPHA
                }
            }
            Activation::Softplus => sigmoid(x),
            Activation::Sigmoid => y * (1.0 - y),
            Activation::Tanh => 1.0 - y * y,
        }
    }
}

impl FromStr for Activation {
    type Err = LfdaeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "identity" | "linear" => Ok(Activation::Identity),
            "relu" => Ok(Activation::Relu),
            "relu6" => Ok(Activation::Relu6),
            "elu" => Ok(Activation::Elu),
            "selu" => Ok(Activation::Selu),
            "softplus" => Ok(Activation::Softplus),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            _ => Err(LfdaeError::Config(format!(
                "unknown activation function: {} (expected one of {})",
                s,
                Activation::NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn sigmoid(x: Flt) -> Flt {
    1.0 / (1.0 + (-x).exp())
}

// log(1 + e^x) without overflow for large x
fn softplus(x: Flt) -> Flt {
    if x > 20.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}
