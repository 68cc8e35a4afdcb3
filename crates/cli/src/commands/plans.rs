//! Plan and bundle catalog listing.

use atelier_core::{Bundle, Plan};

/// Render the catalog as a plain-text table.
#[must_use]
pub fn render() -> String {
    let mut out = String::from("PLAN      SESSIONS/MONTH  SHOPS  PRICE/MONTH\n");
    for plan in Plan::ALL {
        out.push_str(&format!(
            "{:<9} {:>14}  {:>5}  {:>11}\n",
            plan.to_string(),
            plan.included_sessions(),
            plan.max_shops(),
            plan.monthly_price().display(),
        ));
    }

    out.push_str("\nBUNDLE    SESSIONS  PRICE\n");
    for bundle in Bundle::ALL {
        out.push_str(&format!(
            "{:<9} {:>8}  {}\n",
            bundle.to_string(),
            bundle.sessions(),
            bundle.price().display(),
        ));
    }
    out
}

/// Print the catalog to stdout.
pub fn print() {
    #[allow(clippy::print_stdout)]
    {
        print!("{}", render());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_every_plan_and_bundle() {
        let table = render();
        for plan in Plan::ALL {
            assert!(table.contains(&plan.to_string()));
        }
        for bundle in Bundle::ALL {
            assert!(table.contains(&bundle.to_string()));
        }
        assert!(table.contains("$29.00"));
    }
}
