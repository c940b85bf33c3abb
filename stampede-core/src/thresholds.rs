use std::fmt;

/// Raw threshold expressions for one metric, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl ThresholdOp {
    pub fn compare(self, observed: f64, bound: f64) -> bool {
        match self {
            ThresholdOp::Lt => observed < bound,
            ThresholdOp::Lte => observed <= bound,
            ThresholdOp::Gt => observed > bound,
            ThresholdOp::Gte => observed >= bound,
            ThresholdOp::Eq => observed == bound,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ThresholdOp::Lt => "<",
            ThresholdOp::Lte => "<=",
            ThresholdOp::Gt => ">",
            ThresholdOp::Gte => ">=",
            ThresholdOp::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    /// Percentile in `(0, 100]`.
    P(f64),
}

impl fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdAgg::Avg => f.write_str("avg"),
            ThresholdAgg::Min => f.write_str("min"),
            ThresholdAgg::Max => f.write_str("max"),
            ThresholdAgg::Med => f.write_str("med"),
            ThresholdAgg::Count => f.write_str("count"),
            ThresholdAgg::Rate => f.write_str("rate"),
            ThresholdAgg::P(p) => write!(f, "p({p})"),
        }
    }
}

/// A parsed `<aggregator> <op> <bound>` expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

impl ThresholdExpr {
    pub fn passes(&self, observed: f64) -> bool {
        self.op.compare(observed, self.value)
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.agg, self.op.as_str(), self.value)
    }
}

pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-char operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| "missing comparison operator".to_string())?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() {
        return Err("missing aggregator".to_string());
    }
    if right.is_empty() {
        return Err("missing bound".to_string());
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregator `{left}`"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile `{inner}`"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile {inner} out of range (0, 100]"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric bound `{right}`"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric bound `{right}`"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> ThresholdExpr {
        parse_threshold_expr(s).unwrap_or_else(|e| panic!("{s}: {e}"))
    }

    fn parse_err(s: &str) -> String {
        match parse_threshold_expr(s) {
            Ok(expr) => panic!("expected error for {s}, got {expr:?}"),
            Err(e) => e,
        }
    }

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse("  avg  <=  123  ");
        assert_eq!(expr.agg, ThresholdAgg::Avg);
        assert_eq!(expr.op, ThresholdOp::Lte);
        assert_eq!(expr.value, 123.0);
    }

    #[test]
    fn parses_percentiles_including_fractional() {
        assert_eq!(parse("p(95)<500").agg, ThresholdAgg::P(95.0));
        assert_eq!(parse("p(99.9) < 1500").agg, ThresholdAgg::P(99.9));
        assert_eq!(parse("p(100)<1").agg, ThresholdAgg::P(100.0));
    }

    #[test]
    fn parses_every_operator() {
        assert_eq!(parse("rate<0.1").op, ThresholdOp::Lt);
        assert_eq!(parse("rate<=0.1").op, ThresholdOp::Lte);
        assert_eq!(parse("count>0").op, ThresholdOp::Gt);
        assert_eq!(parse("count>=1").op, ThresholdOp::Gte);
        assert_eq!(parse("max==2").op, ThresholdOp::Eq);
        assert_eq!(parse("med<3").agg, ThresholdAgg::Med);
    }

    #[test]
    fn rejects_out_of_range_percentiles() {
        assert!(parse_err("p(101)<1").contains("out of range"));
        assert!(parse_err("p(0)<1").contains("out of range"));
        assert!(parse_err("p(abc)<1").contains("invalid percentile"));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(parse_err("").contains("empty"));
        assert!(parse_err("p(95)").contains("operator"));
        assert!(parse_err("<500").contains("aggregator"));
        assert!(parse_err("avg<").contains("bound"));
        assert!(parse_err("mean<5").contains("unknown aggregator"));
        assert!(parse_err("avg<fast").contains("bound"));
        assert!(parse_err("avg<inf").contains("bound"));
    }

    #[test]
    fn display_is_normalized() {
        assert_eq!(parse(" p(95) < 500 ").to_string(), "p(95)<500");
    }

    #[test]
    fn comparisons() {
        let expr = parse("rate<0.1");
        assert!(expr.passes(0.05));
        assert!(!expr.passes(0.7));
        assert!(parse("count>=3").passes(3.0));
    }
}
