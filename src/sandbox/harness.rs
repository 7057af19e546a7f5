//! Generated action script
//!
//! Every script has three segments in fixed order: the input binding decoded
//! from an embedded JSON literal, the caller's code verbatim, and an epilogue
//! that finds the entry point, calls it with `input_data` and emits the
//! result. Diagnostics go to stderr with a non-zero exit code.
//!
//! Sandboxed scripts print the result to stdout. Trusted scripts write it as
//! JSON to the file named by their first argument, so whatever the action
//! prints never mixes with its return value.
//!
//! `json` and `sys` are always in scope for the action code, and trusted
//! scripts also get `asyncio`. These names are reserved like the prelude.
//!
//! Entry point contract: a function named `handle` wins. Without one, the code
//! must define exactly one other public callable of its own (imported names are
//! ignored). With none, a legacy `output` binding is printed instead.

use serde_json::Value;
use std::fmt::Write;

/// Function name the harness looks for first
pub const ENTRY_POINT_NAME: &str = "handle";

/// The entry point raised
pub const EXIT_ENTRY_FAILED: i32 = 1;
/// Neither an entry point nor a legacy `output` binding was found
pub const EXIT_NO_ENTRY_POINT: i32 = 2;
/// Several candidate entry points and no `handle`
pub const EXIT_AMBIGUOUS_ENTRY_POINT: i32 = 3;

/// Which result convention the epilogue follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessMode {
    /// Mappings are printed as JSON, anything else stringified
    Sandboxed,
    /// Only plain functions qualify and every result is written as JSON to
    /// the result file given as the first argument
    Trusted,
}

const PROLOGUE: &str = "\
import inspect as _inspect
import json as _json
import sys as _sys
import traceback as _traceback

import json
import sys
";

const TRUSTED_IMPORTS: &str = "import asyncio\n";

const EPILOGUE: &str = r#"
# ---- harness ----
def _harness_candidates():
    found = []
    for name, obj in list(globals().items()):
        if name in _harness_reserved or name.startswith("_"):
            continue
        if getattr(obj, "__module__", None) != "__main__":
            continue
        if _harness_trusted and not _inspect.isfunction(obj):
            continue
        if not callable(obj):
            continue
        found.append((name, obj))
    return found


def _harness_entry():
    entry = globals().get("handle")
    if "handle" not in _harness_reserved and callable(entry):
        return entry
    found = _harness_candidates()
    if len(found) > 1:
        names = ", ".join(name for name, _ in found)
        print("Ambiguous entry point (" + names + "): define a function named 'handle'", file=_sys.stderr)
        _sys.exit(3)
    return found[0][1] if found else None


def _harness_emit(result):
    if _harness_trusted:
        with open(_sys.argv[1], "w", encoding="utf-8") as _harness_out:
            _json.dump(result, _harness_out, ensure_ascii=False, default=str)
    elif isinstance(result, dict):
        print(_json.dumps(result, ensure_ascii=False))
    else:
        print(str(result))


_harness_fn = _harness_entry()
if _harness_fn is None:
    if "output" in globals() and "output" not in _harness_reserved:
        _harness_emit(globals()["output"])
        _sys.exit(0)
    print("The action code did not define a callable entry point", file=_sys.stderr)
    _sys.exit(2)

try:
    _harness_emit(_harness_fn(input_data))
except Exception as _harness_exc:
    if _harness_trusted:
        print(str(_harness_exc), file=_sys.stderr)
    else:
        print("Execution failed: " + str(_harness_exc) + "\n" + _traceback.format_exc(), file=_sys.stderr)
    _sys.exit(1)
"#;

/// Render a standalone script for `code` with `input` bound as `input_data`
pub fn render(code: &str, input: &Value, mode: HarnessMode) -> serde_json::Result<String> {
    render_with_prelude(code, input, mode, "")
}

/// Like [`render`], with helper definitions injected before the caller's code.
/// Names the prelude defines are reserved and never picked as the entry point.
pub fn render_with_prelude(
    code: &str,
    input: &Value,
    mode: HarnessMode,
    prelude: &str,
) -> serde_json::Result<String> {
    let literal = input_literal(input)?;
    let trusted = if mode == HarnessMode::Trusted {
        "True"
    } else {
        "False"
    };

    let mut script = String::with_capacity(PROLOGUE.len() + code.len() + EPILOGUE.len() + 256);
    script.push_str(PROLOGUE);
    if mode == HarnessMode::Trusted {
        script.push_str(TRUSTED_IMPORTS);
    }
    // Writing into a String cannot fail
    let _ = writeln!(script, "\ninput_data = _json.loads({})", literal);
    if !prelude.is_empty() {
        script.push('\n');
        script.push_str(prelude);
        if !prelude.ends_with('\n') {
            script.push('\n');
        }
    }
    script.push_str("\n_harness_reserved = frozenset(globals())\n");
    script.push_str("\n# ---- action code ----\n");
    script.push_str(code);
    if !code.ends_with('\n') {
        script.push('\n');
    }
    let _ = writeln!(script, "\n_harness_trusted = {}", trusted);
    script.push_str(EPILOGUE);
    Ok(script)
}

/// JSON text of `input`, quoted again as a string literal Python also accepts
fn input_literal(input: &Value) -> serde_json::Result<String> {
    serde_json::to_string(&serde_json::to_string(input)?)
}
