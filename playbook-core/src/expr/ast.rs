//! Expression AST produced by the parser.
//!
//! References are resolved to typed slots at parse time; only value lookups
//! remain at evaluation time.

/// Field of the open trade addressable as `trade.<field>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeField {
    EntryPrice,
    Lot,
    Sl,
    Tp,
    /// +1 for buy, -1 for sell.
    Direction,
    /// Signed unrealized move in price increments at the current price.
    ProfitPoints,
}

/// Field of the risk configuration addressable as `risk.<field>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskField {
    MaxLot,
    MaxDailyTrades,
    MaxDrawdownPct,
    MaxConcurrentPositions,
}

/// A resolved reference into the evaluation context.
#[derive(Debug, Clone, PartialEq)]
pub enum Ref {
    /// `ind.<id>.<field>` (current bar) or `prev.<id>.<field>` (previous bar).
    Indicator {
        id: String,
        field: String,
        prev: bool,
    },
    /// `var.<name>`.
    Var(String),
    /// `_price` — the market mid-price.
    Price,
    /// `trade.<field>`.
    Trade(TradeField),
    /// `risk.<field>`.
    Risk(RiskField),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

/// Built-in function. Arity is checked at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Min,
    Max,
    Sqrt,
    Log,
    Round,
    Clamp,
    Iff,
}

impl Func {
    pub fn arity(self) -> usize {
        match self {
            Func::Abs | Func::Sqrt | Func::Log => 1,
            Func::Min | Func::Max | Func::Round => 2,
            Func::Clamp | Func::Iff => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Min => "min",
            Func::Max => "max",
            Func::Sqrt => "sqrt",
            Func::Log => "log",
            Func::Round => "round",
            Func::Clamp => "clamp",
            Func::Iff => "iff",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "abs" => Some(Func::Abs),
            "min" => Some(Func::Min),
            "max" => Some(Func::Max),
            "sqrt" => Some(Func::Sqrt),
            "log" => Some(Func::Log),
            "round" => Some(Func::Round),
            "clamp" => Some(Func::Clamp),
            "iff" => Some(Func::Iff),
            _ => None,
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Ref(Ref),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

impl Expr {
    /// Visit every reference in the tree.
    pub fn for_each_ref<F: FnMut(&Ref)>(&self, f: &mut F) {
        match self {
            Expr::Num(_) => {}
            Expr::Ref(r) => f(r),
            Expr::Neg(inner) => inner.for_each_ref(f),
            Expr::Binary(_, lhs, rhs) => {
                lhs.for_each_ref(f);
                rhs.for_each_ref(f);
            }
            Expr::Call(_, args) => {
                for arg in args {
                    arg.for_each_ref(f);
                }
            }
        }
    }
}
