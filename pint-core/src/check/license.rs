// pint-core/src/check/license.rs
use pint_common::error::{PintError, Result};
use pint_common::model::formula::Formula;
use tracing::debug;

/// Refuses the install if any of `formulae` is only available under a
/// forbidden license. Every offender is reported in one error.
pub fn check_forbidden_licenses<'a>(
    formulae: impl IntoIterator<Item = &'a Formula>,
    forbidden: &[String],
) -> Result<()> {
    if forbidden.is_empty() {
        return Ok(());
    }
    let mut offenders = Vec::new();
    for formula in formulae {
        let Some(license) = formula.license.as_deref() else {
            continue;
        };
        if expression_forbidden(license, forbidden) {
            debug!("{} is licensed under forbidden '{}'", formula.name(), license);
            offenders.push(format!("{} ({})", formula.name(), license));
        }
    }
    if offenders.is_empty() {
        Ok(())
    } else {
        offenders.sort();
        offenders.dedup();
        Err(PintError::ForbiddenLicense(offenders))
    }
}

/// An `OR` expression is acceptable if any alternative is; an `AND` term is
/// forbidden if any of its licenses is.
fn expression_forbidden(expression: &str, forbidden: &[String]) -> bool {
    let cleaned = expression.replace(['(', ')'], " ");
    cleaned.split(" OR ").all(|alternative| {
        alternative
            .split(" AND ")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .any(|id| id_forbidden(id, forbidden))
    })
}

fn id_forbidden(id: &str, forbidden: &[String]) -> bool {
    let base = id
        .trim_end_matches('+')
        .trim_end_matches("-or-later")
        .trim_end_matches("-only");
    forbidden
        .iter()
        .any(|f| f.eq_ignore_ascii_case(id) || f.eq_ignore_ascii_case(base))
}
