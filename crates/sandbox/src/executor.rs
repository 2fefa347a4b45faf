//! Single-use Lua scopes for learner submissions.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use mlua::{
    Function, HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Table, Value, VmState,
};
use tracing::{debug, warn};

use crate::error::{SandboxError, describe, is_out_of_memory, root_cause};
use crate::limits::SandboxLimits;
use crate::sample;
use crate::value::ScriptValue;

const CHUNK_NAME: &str = "=submission";

const INTRINSICS: [&str; 9] = [
    "assert", "error", "ipairs", "next", "pairs", "select", "tonumber", "tostring", "type",
];

const LIBRARIES: [(&str, &[&str]); 3] = [
    ("string", &["dump"]),
    ("table", &[]),
    ("math", &["random", "randomseed"]),
];

// Pattern matchers run in C without VM hooks, so they are charged up front.
const PATTERN_FUNCTIONS: [&str; 4] = ["find", "gmatch", "gsub", "match"];

// Byte length charged for a number coerced to a string.
const NUMBER_TEXT_LEN: u64 = 32;

// Trusted helpers evaluated against the real globals before any submission runs.
const PRELUDE: &str = r#"
local error, next, setmetatable, tostring, type = error, next, setmetatable, tostring, type

local function freeze(source)
  local shadow = {}
  for key, value in next, source do
    if type(value) == "table" then
      value = freeze(value)
    end
    shadow[key] = value
  end
  return setmetatable({}, {
    __index = shadow,
    __newindex = function()
      error("sample is read-only", 2)
    end,
    __len = function()
      return #shadow
    end,
    __pairs = function()
      return next, shadow, nil
    end,
    __metatable = false,
  })
end

local function strict(scope)
  return setmetatable(scope, {
    __index = function(_, name)
      error(("`%s` is not defined"):format(tostring(name)), 2)
    end,
    __metatable = false,
  })
end

return freeze, strict
"#;

//
// ─── METER ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trip {
    Instructions = 1,
    Timeout = 2,
    Output = 3,
}

/// Instruction budget and wall-clock deadline shared with the VM hook.
#[derive(Debug)]
struct Meter {
    origin: Instant,
    deadline_ms: AtomicU64,
    remaining: AtomicI64,
    tripped: AtomicU8,
}

impl Meter {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            deadline_ms: AtomicU64::new(0),
            remaining: AtomicI64::new(0),
            tripped: AtomicU8::new(0),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn arm(&self, limits: &SandboxLimits) {
        let timeout = u64::try_from(limits.timeout.as_millis()).unwrap_or(u64::MAX);
        self.deadline_ms
            .store(self.elapsed_ms().saturating_add(timeout), Ordering::Relaxed);
        self.remaining.store(
            i64::try_from(limits.instruction_limit).unwrap_or(i64::MAX),
            Ordering::Relaxed,
        );
        self.tripped.store(0, Ordering::Relaxed);
    }

    fn trip(&self, trip: Trip) {
        self.tripped.store(trip as u8, Ordering::Relaxed);
    }

    fn tripped(&self) -> Option<Trip> {
        match self.tripped.load(Ordering::Relaxed) {
            1 => Some(Trip::Instructions),
            2 => Some(Trip::Timeout),
            3 => Some(Trip::Output),
            _ => None,
        }
    }

    /// Spend `cost` instructions at once, for work the hook cannot see.
    fn charge(&self, cost: u64) -> mlua::Result<()> {
        let cost = i64::try_from(cost).unwrap_or(i64::MAX);
        if self.remaining.load(Ordering::Relaxed) < cost {
            self.trip(Trip::Instructions);
            return Err(mlua::Error::RuntimeError(
                "instruction limit exceeded".into(),
            ));
        }
        self.remaining.fetch_sub(cost, Ordering::Relaxed);
        Ok(())
    }

    fn check(&self, interval: u32) -> mlua::Result<VmState> {
        if self.elapsed_ms() > self.deadline_ms.load(Ordering::Relaxed) {
            self.trip(Trip::Timeout);
            return Err(mlua::Error::RuntimeError("execution timed out".into()));
        }
        let left = self
            .remaining
            .fetch_sub(i64::from(interval), Ordering::Relaxed)
            - i64::from(interval);
        if left < 0 {
            self.trip(Trip::Instructions);
            return Err(mlua::Error::RuntimeError(
                "instruction limit exceeded".into(),
            ));
        }
        Ok(VmState::Continue)
    }
}

//
// ─── SANDBOX ───────────────────────────────────────────────────────────────────
//

/// Runs submitted program text; every call to [`Sandbox::execute`] gets a new interpreter.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    limits: SandboxLimits,
}

impl Sandbox {
    #[must_use]
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    /// Run `text` as a complete chunk in a fresh strict scope.
    ///
    /// The scope sees only the language intrinsics, `record` and `sample`.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError` if the text does not parse, raises at runtime, or exceeds
    /// one of the configured caps.
    pub fn execute(&self, text: &str) -> Result<Execution, SandboxError> {
        let execution = Execution::prepare(self.limits.clone())
            .map_err(|err| SandboxError::Setup(describe(&err)))?;

        execution.meter.arm(&self.limits);
        let outcome = execution
            .lua
            .load(text)
            .set_name(CHUNK_NAME)
            .set_environment(execution.scope.clone())
            .exec();

        match outcome {
            Ok(()) => {
                debug!(
                    entries = execution.log.borrow().len(),
                    functions = execution.exposed_functions().len(),
                    "submission finished"
                );
                Ok(execution)
            }
            Err(err) => Err(execution.classify(&err)),
        }
    }
}

//
// ─── EXECUTION ─────────────────────────────────────────────────────────────────
//

/// What a submitted chunk left behind in its scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Function,
    Missing,
    /// Bound to a non-callable value of this Lua type.
    Other(&'static str),
}

/// Host-side argument for [`Execution::call`].
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Integer(i64),
    Number(f64),
    Text(String),
    /// The read-only sample dataset.
    Sample,
}

/// A finished run: its output log and the scope it populated.
pub struct Execution {
    lua: Lua,
    scope: Table,
    sample: Table,
    baseline: BTreeSet<String>,
    log: Rc<RefCell<Vec<ScriptValue>>>,
    meter: Arc<Meter>,
    limits: SandboxLimits,
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("entries", &self.log.borrow().len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Execution {
    fn prepare(limits: SandboxLimits) -> mlua::Result<Self> {
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH,
            LuaOptions::new(),
        )?;
        lua.set_memory_limit(limits.memory_limit)?;

        let globals = lua.globals();
        // String values index the real library through their metatable.
        let real_string: Table = globals.raw_get("string")?;
        real_string.raw_set("dump", Value::Nil)?;
        let meter = Arc::new(Meter::new());
        guard_patterns(&lua, &real_string, &meter)?;

        let (freeze, strict): (Function, Function) =
            lua.load(PRELUDE).set_name("=prelude").eval()?;

        let scope = lua.create_table()?;
        for name in INTRINSICS {
            let intrinsic: Value = globals.raw_get(name)?;
            scope.raw_set(name, intrinsic)?;
        }
        for (library, hidden) in LIBRARIES {
            let source: Table = globals.raw_get(library)?;
            let copy = lua.create_table()?;
            source.for_each(|key: String, value: Value| {
                if hidden.contains(&key.as_str()) {
                    return Ok(());
                }
                copy.raw_set(key, value)
            })?;
            scope.raw_set(library, copy)?;
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        let record = {
            let log = Rc::clone(&log);
            let meter = Arc::clone(&meter);
            let cap = limits.max_output_entries;
            lua.create_function(move |_, values: MultiValue| {
                let mut log = log.borrow_mut();
                if log.len() + values.len() > cap {
                    meter.trip(Trip::Output);
                    return Err(mlua::Error::RuntimeError(format!(
                        "output limit of {cap} entries reached"
                    )));
                }
                log.extend(values.iter().map(ScriptValue::from_lua));
                Ok(())
            })?
        };
        scope.raw_set("record", record)?;

        let sample: Table = freeze.call(sample::build_table(&lua)?)?;
        scope.raw_set("sample", sample.clone())?;

        let mut baseline = BTreeSet::new();
        scope.for_each(|key: String, _: Value| {
            baseline.insert(key);
            Ok(())
        })?;

        let scope: Table = strict.call(scope)?;

        let interval = limits.hook_interval.max(1);
        let hook_meter = Arc::clone(&meter);
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(interval),
            move |_lua, _debug| hook_meter.check(interval),
        );

        Ok(Self {
            lua,
            scope,
            sample,
            baseline,
            log,
            meter,
            limits,
        })
    }

    /// Values passed to `record`, in call order.
    #[must_use]
    pub fn output(&self) -> Vec<ScriptValue> {
        self.log.borrow().clone()
    }

    #[must_use]
    pub fn binding(&self, name: &str) -> Binding {
        match self.scope.raw_get::<Value>(name) {
            Ok(Value::Nil) | Err(_) => Binding::Missing,
            Ok(Value::Function(_)) => Binding::Function,
            Ok(other) => Binding::Other(other.type_name()),
        }
    }

    /// Names of the functions the submission defined, sorted.
    #[must_use]
    pub fn exposed_functions(&self) -> Vec<String> {
        let mut names = Vec::new();
        let collected = self.scope.for_each(|key: Value, value: Value| {
            if let (Value::String(key), Value::Function(_)) = (&key, &value) {
                let key = String::from(key.to_string_lossy());
                if !self.baseline.contains(&key) {
                    names.push(key);
                }
            }
            Ok(())
        });
        if collected.is_err() {
            return Vec::new();
        }
        names.sort();
        names
    }

    /// Invoke an exposed function under freshly armed caps and return its first result.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Runtime` if `name` is not a function, or any cap or runtime
    /// failure raised while it runs.
    pub fn call(&self, name: &str, args: &[Argument]) -> Result<ScriptValue, SandboxError> {
        let function = match self.scope.raw_get::<Value>(name) {
            Ok(Value::Function(function)) => function,
            Ok(other) => {
                return Err(SandboxError::Runtime(format!(
                    "`{name}` is a {}, not a function",
                    other.type_name()
                )));
            }
            Err(err) => return Err(SandboxError::Runtime(describe(&err))),
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(
                self.to_lua(arg)
                    .map_err(|err| SandboxError::Setup(describe(&err)))?,
            );
        }

        self.meter.arm(&self.limits);
        function
            .call::<Value>(MultiValue::from_vec(values))
            .map(|value| ScriptValue::from_lua(&value))
            .map_err(|err| self.classify(&err))
    }

    fn to_lua(&self, arg: &Argument) -> mlua::Result<Value> {
        Ok(match arg {
            Argument::Integer(int) => Value::Integer(*int),
            Argument::Number(num) => Value::Number(*num),
            Argument::Text(text) => Value::String(self.lua.create_string(text)?),
            Argument::Sample => Value::Table(self.sample.clone()),
        })
    }

    fn classify(&self, err: &mlua::Error) -> SandboxError {
        let classified = match self.meter.tripped() {
            Some(Trip::Instructions) => SandboxError::InstructionLimit {
                limit: self.limits.instruction_limit,
            },
            Some(Trip::Timeout) => SandboxError::Timeout {
                millis: self.limits.timeout.as_millis(),
            },
            Some(Trip::Output) => SandboxError::OutputLimit {
                limit: self.limits.max_output_entries,
            },
            None if is_out_of_memory(err) => SandboxError::MemoryLimit {
                bytes: self.limits.memory_limit,
            },
            None => match root_cause(err) {
                mlua::Error::SyntaxError { .. } => SandboxError::Parse(describe(err)),
                _ => SandboxError::Runtime(describe(err)),
            },
        };
        match &classified {
            SandboxError::Parse(_) | SandboxError::Runtime(_) => {
                debug!(error = %classified, "submission failed");
            }
            _ => warn!(error = %classified, "submission stopped by sandbox cap"),
        }
        classified
    }
}

//
// ─── PATTERNS ──────────────────────────────────────────────────────────────────
//

/// Replace the matchers in the real `string` table with metered wrappers.
///
/// Method calls on strings and the scope's library copy both resolve to the wrappers.
fn guard_patterns(lua: &Lua, string: &Table, meter: &Arc<Meter>) -> mlua::Result<()> {
    for name in PATTERN_FUNCTIONS {
        let original: Function = string.raw_get(name)?;
        let meter = Arc::clone(meter);
        let guarded = lua.create_function(move |_, args: MultiValue| {
            meter.charge(pattern_cost(name, &args))?;
            original.call::<MultiValue>(args)
        })?;
        string.raw_set(name, guarded)?;
    }
    Ok(())
}

/// Worst-case backtracking work for one matcher call.
///
/// Every quantifier can retry against each remaining subject byte, and an unanchored pattern
/// is retried from every start position.
fn pattern_cost(name: &str, args: &MultiValue) -> u64 {
    let subject = args.front().map_or(0, text_len);
    let Some(pattern) = args.get(1).and_then(pattern_bytes) else {
        return subject;
    };
    let width = u64::try_from(pattern.len().max(1)).unwrap_or(u64::MAX);
    if name == "find" && args.get(3).is_some_and(is_truthy) {
        return subject.saturating_mul(width);
    }
    let anchored = pattern.first() == Some(&b'^');
    let exponent = quantifiers(&pattern) + u32::from(!anchored);
    subject
        .saturating_add(1)
        .saturating_pow(exponent)
        .saturating_mul(width)
}

/// Count of backtracking items: `*`, `+`, `-`, `?` and `%b`, outside escapes and sets.
fn quantifiers(pattern: &[u8]) -> u32 {
    let mut count = 0_u32;
    let mut i = 0;
    while i < pattern.len() {
        match pattern[i] {
            b'%' => match pattern.get(i + 1) {
                Some(b'b') => {
                    count = count.saturating_add(1);
                    i += 4;
                }
                _ => i += 2,
            },
            b'[' => i = skip_set(pattern, i + 1),
            b'*' | b'+' | b'-' | b'?' => {
                count = count.saturating_add(1);
                i += 1;
            }
            _ => i += 1,
        }
    }
    count
}

/// Index just past the `]` closing a set whose body starts at `i`.
fn skip_set(pattern: &[u8], mut i: usize) -> usize {
    if pattern.get(i) == Some(&b'^') {
        i += 1;
    }
    // A leading `]` is a literal member.
    if pattern.get(i) == Some(&b']') {
        i += 1;
    }
    while i < pattern.len() {
        match pattern[i] {
            b'%' => i += 2,
            b']' => return i + 1,
            _ => i += 1,
        }
    }
    i
}

fn text_len(value: &Value) -> u64 {
    match value {
        Value::String(text) => u64::try_from(text.as_bytes().len()).unwrap_or(u64::MAX),
        Value::Integer(_) | Value::Number(_) => NUMBER_TEXT_LEN,
        _ => 0,
    }
}

fn pattern_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(text) => Some(text.as_bytes().to_vec()),
        Value::Integer(number) => Some(number.to_string().into_bytes()),
        Value::Number(number) => Some(number.to_string().into_bytes()),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::DEFAULT_INSTRUCTION_LIMIT;
    use std::time::Duration;

    fn run(text: &str) -> Result<Execution, SandboxError> {
        Sandbox::default().execute(text)
    }

    #[test]
    fn exposes_defined_functions_and_records_output() {
        let execution = run("function add(a, b) return a + b end\nrecord(1, 'two')").unwrap();
        assert_eq!(execution.binding("add"), Binding::Function);
        assert_eq!(execution.binding("sub"), Binding::Missing);
        assert_eq!(execution.exposed_functions(), vec!["add".to_string()]);
        assert_eq!(
            execution.output(),
            vec![ScriptValue::Integer(1), ScriptValue::Text("two".into())]
        );
        assert_eq!(
            execution
                .call("add", &[Argument::Integer(2), Argument::Integer(3)])
                .unwrap(),
            ScriptValue::Integer(5)
        );
    }

    #[test]
    fn non_function_bindings_report_their_type() {
        let execution = run("add = 42").unwrap();
        assert_eq!(execution.binding("add"), Binding::Other("number"));
        assert!(matches!(
            execution.call("add", &[]),
            Err(SandboxError::Runtime(_))
        ));
    }

    #[test]
    fn syntax_errors_are_parse_failures() {
        let err = run("function add(a, b return a + b end").unwrap_err();
        assert!(matches!(err, SandboxError::Parse(_)), "{err:?}");
    }

    #[test]
    fn host_globals_are_not_reachable() {
        for name in ["print", "os", "io", "require", "load", "debug", "pcall", "setmetatable"] {
            let err = run(&format!("local x = {name}")).unwrap_err();
            let SandboxError::Runtime(message) = err else {
                panic!("{name}: expected runtime error, got {err:?}");
            };
            assert!(message.contains(&format!("`{name}` is not defined")), "{message}");
        }
    }

    #[test]
    fn hidden_library_members_are_absent() {
        let execution = run("record(string.dump == nil, math.random == nil, math.floor(2.5))").unwrap();
        assert_eq!(
            execution.output(),
            vec![
                ScriptValue::Boolean(true),
                ScriptValue::Boolean(true),
                ScriptValue::Integer(2),
            ]
        );
    }

    #[test]
    fn scopes_do_not_share_state() {
        let sandbox = Sandbox::default();
        sandbox.execute("leak = 1\nstring.upper = nil").unwrap();
        let second = sandbox.execute("record(string.upper('a'))").unwrap();
        assert_eq!(second.output(), vec![ScriptValue::Text("A".into())]);
        assert!(matches!(
            sandbox.execute("record(leak)"),
            Err(SandboxError::Runtime(_))
        ));
    }

    #[test]
    fn sample_is_read_only() {
        let execution = run("record(#sample, sample[2].lastName)").unwrap();
        assert_eq!(
            execution.output(),
            vec![ScriptValue::Integer(2), ScriptValue::Text("Turing".into())]
        );

        for write in ["sample[3] = {}", "sample[1].age = 0"] {
            let err = run(write).unwrap_err();
            let SandboxError::Runtime(message) = err else {
                panic!("expected runtime error, got {err:?}");
            };
            assert!(message.contains("read-only"), "{message}");
        }
    }

    #[test]
    fn infinite_loops_hit_the_instruction_limit() {
        let sandbox = Sandbox::new(SandboxLimits::default().with_instruction_limit(100_000));
        let err = sandbox.execute("while true do end").unwrap_err();
        assert_eq!(err, SandboxError::InstructionLimit { limit: 100_000 });
    }

    #[test]
    fn slow_code_hits_the_timeout() {
        let limits = SandboxLimits::default()
            .with_instruction_limit(u64::MAX)
            .with_timeout(Duration::from_millis(50));
        let err = Sandbox::new(limits).execute("while true do end").unwrap_err();
        assert_eq!(err, SandboxError::Timeout { millis: 50 });
    }

    #[test]
    fn caps_are_rearmed_for_each_call() {
        let sandbox = Sandbox::new(SandboxLimits::default().with_instruction_limit(200_000));
        let execution = sandbox
            .execute("function spin() while true do end end\nfunction one() return 1 end")
            .unwrap();
        assert!(matches!(
            execution.call("spin", &[]),
            Err(SandboxError::InstructionLimit { .. })
        ));
        assert_eq!(execution.call("one", &[]).unwrap(), ScriptValue::Integer(1));
    }

    #[test]
    fn output_log_is_capped() {
        let sandbox = Sandbox::new(SandboxLimits::default().with_max_output_entries(10));
        let err = sandbox
            .execute("for i = 1, 11 do record(i) end")
            .unwrap_err();
        assert_eq!(err, SandboxError::OutputLimit { limit: 10 });
    }

    #[test]
    fn backtracking_patterns_hit_the_instruction_limit() {
        let limits = SandboxLimits::default().with_timeout(Duration::from_millis(500));
        let sandbox = Sandbox::new(limits);
        for text in [
            "local s = string.rep('a', 3000)\nrecord(s:find('.-.-.-.-b'))",
            "local s = string.rep('a', 3000)\nrecord(string.gsub(s, 'a*a*a*b', ''))",
            "local s = string.rep('a', 3000)\nfor m in s:gmatch('a-a-a-a-b') do record(m) end",
        ] {
            let err = sandbox.execute(text).unwrap_err();
            assert_eq!(
                err,
                SandboxError::InstructionLimit {
                    limit: DEFAULT_INSTRUCTION_LIMIT
                },
                "{text}"
            );
        }
    }

    #[test]
    fn ordinary_patterns_still_match() {
        let execution = run(concat!(
            "record(('a,b'):find(',', 1, true))\n",
            "record(('x=12'):match('%d+'))\n",
            "record((string.gsub('a-b-c', '%-', ',')))\n",
            "for word in ('one two'):gmatch('%a+') do record(word) end",
        ))
        .unwrap();
        assert_eq!(
            execution.output(),
            vec![
                ScriptValue::Integer(2),
                ScriptValue::Integer(2),
                ScriptValue::Text("12".into()),
                ScriptValue::Text("a,b,c".into()),
                ScriptValue::Text("one".into()),
                ScriptValue::Text("two".into()),
            ]
        );
    }

    #[test]
    fn pattern_cost_ignores_escaped_and_set_quantifiers() {
        assert_eq!(quantifiers(b"%d+"), 1);
        assert_eq!(quantifiers(b"[%-*+]x"), 0);
        assert_eq!(quantifiers(b"[]*]-"), 1);
        assert_eq!(quantifiers(b"%b()%f[%w]a*"), 2);
        assert_eq!(quantifiers(b"a%*"), 0);
    }

    #[test]
    fn allocations_are_capped() {
        let sandbox = Sandbox::new(SandboxLimits::default().with_memory_limit(4 * 1024 * 1024));
        let err = sandbox
            .execute("local s = string.rep('x', 1 << 30)")
            .unwrap_err();
        assert!(matches!(err, SandboxError::MemoryLimit { .. }), "{err:?}");
    }
}
