/// `scripting/sandbox.rs` — Lua VM construction and the `protect` primitive
///
/// Every run gets a fresh VM with a restricted set of standard libraries and a
/// `package.path` built only from vetted module directories. Script code never
/// sees the VM's globals: `protect` compiles it against a whitelist-only
/// environment table instead.

use std::{
    env, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use mlua::{
    ChunkMode, Function, HookTriggers, Lua, LuaOptions, MultiValue, Result as LuaResult, StdLib,
    Table, Value,
};

/// Name scripts' host code uses to `require` the sandbox primitive.
pub const SANDBOX_MODULE: &str = "sandbox";

/// Chunk name shown in script error messages.
const CHUNK_NAME: &str = "=script";

/// Base functions copied into every script environment.
const SAFE_GLOBALS: &[&str] = &[
    "assert", "error", "ipairs", "next", "pairs", "pcall", "select", "tonumber", "tostring",
    "type", "xpcall", "_VERSION",
];

/// Libraries copied whole, minus the listed members.
const SAFE_LIBRARIES: &[(&str, &[&str])] = &[
    ("string", &["dump"]),
    ("table", &[]),
    ("math", &[]),
    ("coroutine", &[]),
];

const SAFE_OS: &[&str] = &["clock", "difftime", "time"];

// ── Module search path ────────────────────────────────────────────────────────

/// Ordered, process-fixed list of vetted module directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSearchPath {
    dirs: Vec<PathBuf>,
}

impl ModuleSearchPath {
    /// Every directory must exist; paths are canonicalized.
    pub fn new<I, P>(dirs: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut resolved = Vec::new();
        for dir in dirs {
            let dir = dir.as_ref().canonicalize()?;
            if !dir.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not a directory", dir.display()),
                ));
            }
            resolved.push(dir);
        }
        Ok(Self { dirs: resolved })
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Value for `package.path`. Empty when no directories are configured.
    pub fn package_path(&self) -> String {
        self.dirs
            .iter()
            .flat_map(|dir| {
                let dir = dir.display();
                [format!("{dir}/?.lua"), format!("{dir}/?/init.lua")]
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

// ── Working directory ─────────────────────────────────────────────────────────

static WORKDIR_LOCK: Mutex<()> = Mutex::new(());

/// Switches the process working directory for the lifetime of the guard.
///
/// The working directory is process-wide, so guards are serialized through a
/// global lock and the previous directory is restored on drop, on every path.
pub struct WorkdirGuard {
    original: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl WorkdirGuard {
    pub fn enter(dir: &Path) -> io::Result<Self> {
        let lock = WORKDIR_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let original = env::current_dir()?;
        env::set_current_dir(dir)?;
        Ok(Self {
            original,
            _lock: lock,
        })
    }
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        if let Err(e) = env::set_current_dir(&self.original) {
            log::error!(
                "[sandbox] failed to restore working directory {}: {e}",
                self.original.display()
            );
        }
    }
}

// ── VM ────────────────────────────────────────────────────────────────────────

/// Creates a new Lua VM with sandbox restrictions applied.
pub fn create_sandboxed_vm(search_path: &ModuleSearchPath) -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE
            | StdLib::STRING
            | StdLib::MATH
            | StdLib::COROUTINE
            | StdLib::OS
            | StdLib::PACKAGE,
        LuaOptions::default(),
    )?;

    let globals = lua.globals();
    // Both read arbitrary files, bypassing package.path.
    globals.set("dofile", Value::Nil)?;
    globals.set("loadfile", Value::Nil)?;

    let package: Table = globals.get("package")?;
    package.set("path", search_path.package_path())?;
    package.set("cpath", "")?;
    package.set("loadlib", Value::Nil)?;

    let preload: Table = package.get("preload")?;
    preload.set(SANDBOX_MODULE, lua.create_function(open_sandbox_module)?)?;

    Ok(lua)
}

/// Loader for the `sandbox` module: `{ protect = function(code, options) }`.
fn open_sandbox_module(lua: &Lua, _: MultiValue) -> LuaResult<Table> {
    let module = lua.create_table()?;
    module.set("protect", lua.create_function(protect)?)?;
    Ok(module)
}

/// `sandbox.protect(code, options)` → function running `code` in isolation.
///
/// `options.env` entries are visible to the code on top of the safe base
/// library. `options.instructions` aborts the run after that many VM
/// instructions. Binary chunks are refused.
pub fn protect(lua: &Lua, (code, options): (String, Option<Table>)) -> LuaResult<Function> {
    let (extra, limit) = match options {
        Some(options) => (
            options.get::<Option<Table>>("env")?,
            options.get::<Option<u32>>("instructions")?,
        ),
        None => (None, None),
    };

    let env = build_env(lua, extra)?;
    let inner = lua
        .load(code.as_str())
        .set_name(CHUNK_NAME)
        .set_mode(ChunkMode::Text)
        .set_environment(env)
        .into_function()?;

    let limit = match limit {
        Some(limit) if limit > 0 => limit,
        _ => return Ok(inner),
    };

    lua.create_function(move |lua, args: MultiValue| {
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(limit),
            move |_lua, _debug| {
                Err(mlua::Error::RuntimeError(format!(
                    "instruction limit exceeded ({limit})"
                )))
            },
        );
        let result = inner.call::<MultiValue>(args);
        lua.remove_hook();
        result
    })
}

/// Whitelist-only environment: safe base functions, copies of the safe
/// libraries, then the caller's entries. `_G` points back at the table.
fn build_env(lua: &Lua, extra: Option<Table>) -> LuaResult<Table> {
    let env = lua.create_table()?;
    let globals = lua.globals();

    for name in SAFE_GLOBALS {
        let value: Value = globals.get(*name)?;
        if !value.is_nil() {
            env.set(*name, value)?;
        }
    }

    for (lib_name, denied) in SAFE_LIBRARIES {
        if let Some(lib) = globals.get::<Option<Table>>(*lib_name)? {
            let copy = lua.create_table()?;
            for pair in lib.pairs::<String, Value>() {
                let (key, value) = pair?;
                if !denied.contains(&key.as_str()) {
                    copy.set(key, value)?;
                }
            }
            env.set(*lib_name, copy)?;
        }
    }

    if let Some(os) = globals.get::<Option<Table>>("os")? {
        let copy = lua.create_table()?;
        for name in SAFE_OS {
            copy.set(*name, os.get::<Value>(*name)?)?;
        }
        env.set("os", copy)?;
    }

    if let Some(table) = globals.get::<Option<Table>>("table")? {
        env.set("unpack", table.get::<Value>("unpack")?)?;
    }

    if let Some(extra) = extra {
        for pair in extra.pairs::<Value, Value>() {
            let (key, value) = pair?;
            env.set(key, value)?;
        }
    }

    env.set("_G", env.clone())?;
    Ok(env)
}
