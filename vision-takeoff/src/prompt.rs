use takeoff_core::CalcMode;

/// Calculation instruction for the model, per mode
fn math_instruction(mode: CalcMode) -> String {
    match mode {
        CalcMode::Area => "Read the length and width annotations of each region and compute its \
             plan area (Area, m2). Put the length in dim1 and the width in dim2."
            .to_string(),
        CalcMode::Perimeter => "Read the side length annotations of each region and compute its \
             total perimeter (Perimeter, m). Put the perimeter in dim1 and 0 in dim2."
            .to_string(),
        CalcMode::WallArea { height } => format!(
            "First compute the total perimeter of each region, then multiply the perimeter by \
             the floor height of {:.2} m to obtain the vertical wall surface area \
             (Wall Area, m2). Put the perimeter in dim1 and 0 in dim2.",
            height
        ),
    }
}

/// Build the estimator prompt sent next to the drawing
pub fn build_prompt(rules: &str, mode: CalcMode) -> String {
    let rules = rules.trim();
    let rules = if rules.is_empty() {
        "(no extra definitions; measure every enclosed region that carries dimensions)"
    } else {
        rules
    };

    format!(
        "You are a professional construction quantity surveyor. \
         Analyse this drawing according to the following rules.\n\
         [User definitions]\n{rules}\n\
         [Calculation target]\n{math}\n\
         [Output format]\n\
         Return ONLY a JSON array of objects with this exact structure:\n\
         [{{\"item_name\": \"Office A\", \"description\": \"yellow outline\", \
         \"dim1\": 12.0, \"dim2\": 8.5, \"formula_str\": \"12.0 x 8.5\", \
         \"result\": 102.0, \"unit\": \"{unit}\"}}]\n\
         All dimensions are in metres. If nothing matches the rules, return [].\n\
         Do not output Markdown.",
        rules = rules,
        math = math_instruction(mode),
        unit = mode.unit(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_rules_and_unit() {
        let prompt = build_prompt("- yellow lines are office A", CalcMode::Area);
        assert!(prompt.contains("- yellow lines are office A"));
        assert!(prompt.contains("plan area"));
        assert!(prompt.contains(r#""unit": "m2""#));
        assert!(prompt.contains("Do not output Markdown."));
    }

    #[test]
    fn test_prompt_wall_area_mentions_height() {
        let prompt = build_prompt("red = room B", CalcMode::wall_area(2.8));
        assert!(prompt.contains("2.80 m"));
        assert!(prompt.contains("Put the perimeter in dim1"));
    }

    #[test]
    fn test_prompt_perimeter_unit() {
        let prompt = build_prompt("", CalcMode::Perimeter);
        assert!(prompt.contains(r#""unit": "m""#));
        assert!(prompt.contains("no extra definitions"));
    }
}
