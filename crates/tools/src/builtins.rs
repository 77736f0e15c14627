//! Built-in Code tools shipped with every catalog.

use switchyard_core::tool::{ParamSpec, ToolDescriptor, ToolKind};

pub const CURRENT_DATETIME: &str = "current_datetime";
pub const CALCULATE: &str = "calculate";

const CURRENT_DATETIME_CODE: &str = r#"
local weekdays = { "Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday" }
result = {
    datetime = clock.date("%Y-%m-%d %H:%M:%S"),
    date = clock.date("%Y-%m-%d"),
    time = clock.date("%H:%M:%S"),
    weekday = weekdays[tonumber(clock.date("%w")) + 1],
    iso = clock.now(),
}
"#;

const CALCULATE_CODE: &str = r#"
local expression = tostring(arguments.expression or "")
if expression == "" or not expression:match("^[%d%+%-%*/%(%)%.%^%% ]+$") then
    result = { error = "expression contains disallowed characters" }
else
    local chunk, err = load("return " .. expression, "expression", "t", {})
    if not chunk then
        result = { error = "invalid expression: " .. tostring(err) }
    else
        local ok, value = pcall(chunk)
        if ok and type(value) == "number" then
            if math.type(value) == "float" and value == math.floor(value) and math.abs(value) < 1e15 then
                value = math.tointeger(value)
            end
            result = { expression = expression, result = value }
        else
            result = { error = "could not evaluate: " .. tostring(value) }
        end
    end
end
"#;

/// `current_datetime`: local date, time and weekday.
pub fn current_datetime() -> ToolDescriptor {
    let mut tool = ToolDescriptor::new(CURRENT_DATETIME, ToolKind::Code, CURRENT_DATETIME_CODE)
        .with_description("Get the current local date, time and weekday");
    tool.substitute = false;
    tool
}

/// `calculate`: evaluate an arithmetic expression.
pub fn calculate() -> ToolDescriptor {
    let mut tool = ToolDescriptor::new(CALCULATE, ToolKind::Code, CALCULATE_CODE)
        .with_description(
            "Evaluate an arithmetic expression. Supports +, -, *, /, % (modulo), ^ (power) and parentheses.",
        )
        .with_param(
            "expression",
            ParamSpec::new("string", "The expression to evaluate, e.g. '2 + 2' or '(3 * 4) ^ 2'", true),
        );
    tool.substitute = false;
    tool
}

/// Both built-ins, in catalog order.
pub fn all() -> Vec<ToolDescriptor> {
    vec![current_datetime(), calculate()]
}
