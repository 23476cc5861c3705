//! Work-list driver: the reachability fixpoint of one translation run.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write;
use std::rc::Rc;
use std::time::Instant;

use indexmap::IndexMap;
use ilcxx_core::{Metadata, MethodId, TypeId, TypeKind};
use tracing::{debug, info, info_span};

use crate::builtin::Builtin;
use crate::config::Config;
use crate::layout::Layouts;
use crate::method_key::MethodKey;
use crate::naming::Naming;
use crate::unit::{Partition, TranslationUnit};
use crate::{Error, Result};

/// Translates a closed-world program, starting from an entry method.
///
/// A transpiler is consumed by [`Transpiler::run`]; builtin providers get
/// `&mut Transpiler` to name types and methods and to queue work.
pub struct Transpiler {
    pub(crate) metadata: Metadata,
    pub(crate) builtin: Rc<dyn Builtin>,
    pub(crate) config: Config,
    pub(crate) unit: TranslationUnit,
    pub(crate) layouts: Layouts,
    /// Type-argument lists of every generic slot, in first-use order.
    pub(crate) generic_indices: HashMap<MethodKey, IndexMap<Vec<TypeId>, usize>>,
    pub(crate) naming: Naming,
    pub(crate) queued_types: VecDeque<TypeId>,
    queued_methods: VecDeque<MethodId>,
    visited: HashSet<MethodKey>,
}

impl Transpiler {
    pub fn new(metadata: Metadata, builtin: Rc<dyn Builtin>, config: Config) -> Self {
        Self {
            metadata,
            builtin,
            unit: TranslationUnit::new(config.definition_files),
            config,
            layouts: Layouts::default(),
            generic_indices: HashMap::new(),
            naming: Naming::default(),
            queued_types: VecDeque::new(),
            queued_methods: VecDeque::new(),
            visited: HashSet::new(),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Derived types (`T*`, `T&`, `T[]`) can be interned through this.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Queue a method for translation. Already translated methods are skipped
    /// when dequeued.
    pub fn enqueue(&mut self, method: MethodId) {
        self.queued_methods.push_back(method);
    }

    /// The method was dequeued and translated (or declared as external).
    pub(crate) fn is_translated(&self, method: MethodId) -> bool {
        MethodKey::of(&self.metadata, method).is_ok_and(|key| self.visited.contains(&key))
    }

    /// Translate everything reachable from `entry`.
    pub fn run(mut self, entry: MethodId) -> Result<TranslationUnit> {
        let span = info_span!("transpile", entry = %self.metadata.method_name(entry));
        let _guard = span.enter();
        let started = Instant::now();

        self.seed()?;
        self.enqueue(entry);
        loop {
            if let Some(method) = self.queued_methods.pop_front() {
                self.process(method)?;
            }
            while let Some(ty) = self.queued_types.pop_front() {
                self.define(ty)?;
            }
            if self.queued_methods.is_empty() {
                break;
            }
        }

        self.emit_descriptors()?;
        self.emit_finalizer()?;
        self.emit_main(entry)?;
        info!(
            types = self.layouts.iter().count(),
            methods = self.visited.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "translation finished"
        );
        Ok(self.unit)
    }

    /// Types and methods the runtime relies on, plus the configured bundle.
    fn seed(&mut self) -> Result<()> {
        if let Some(ty) = self.metadata.find_type("System.Type") {
            self.define(ty)?;
        }
        let object = self.metadata.well_known().object;
        if let Some(finalize) = self.metadata.find_method(object, "Finalize") {
            self.method_ident(finalize)?;
        }
        if let Some(thread) = self.metadata.find_type("System.Threading.Thread") {
            self.define(thread)?;
        }
        for name in [
            "System.Threading.ThreadStart",
            "System.Threading.ParameterizedThreadStart",
        ] {
            if let Some(invoke) = self
                .metadata
                .find_type(name)
                .and_then(|t| self.metadata.find_method(t, "Invoke"))
            {
                self.enqueue(invoke);
            }
        }
        let string = self.metadata.well_known().string;
        self.define(string)?;
        for ty in self.config.bundle_types.clone() {
            self.define(ty)?;
        }
        for method in self.config.bundle_methods.clone() {
            self.enqueue(method);
        }
        Ok(())
    }

    /// Type of `this` inside an instance method of `declaring`.
    pub(crate) fn this_type(&mut self, declaring: TypeId) -> TypeId {
        if self.metadata.ty(declaring).is_value_type() {
            self.metadata.pointer_to(declaring)
        } else {
            declaring
        }
    }

    fn process(&mut self, method: MethodId) -> Result<()> {
        let key = MethodKey::of(&self.metadata, method)?;
        if self.metadata.method(method).is_abstract || !self.visited.insert(key) {
            return Ok(());
        }
        debug!(method = %self.metadata.method_name(method), "translating");

        let builtin = Rc::clone(&self.builtin);
        let body = builtin.body(self, method)?;
        let def = self.metadata.method(method).clone();
        let declaring = def.declaring;
        let declaring_def = self.metadata.ty(declaring).clone();

        let mut prototype = format!(
            "\n// {}\n// {}\n// {}",
            declaring_def.full_name(),
            self.metadata.method_name(method),
            flags(&def)
        );
        let mut parameters: Vec<(String, TypeId)> = def
            .parameters
            .iter()
            .map(|p| {
                let out = if p.is_out { "[out] " } else { "" };
                (
                    format!("\n\t// {out}{} {}", self.metadata.ty(p.ty).full_name(), p.name),
                    p.ty,
                )
            })
            .collect();
        if !def.is_static && !(def.is_constructor() && body.is_some()) {
            let this = self.this_type(declaring);
            parameters.insert(0, (String::new(), this));
        }
        let mut arguments = Vec::with_capacity(parameters.len());
        for (i, (prefix, ty)) in parameters.iter().enumerate() {
            arguments.push(format!("{prefix}\n\t{} a_{i}", self.scoped_type(*ty)?));
        }
        let returns = if def.is_constructor() && !def.is_static && body.is_some() {
            self.scoped_type(declaring)?
        } else {
            self.scoped_type(def.return_type)?
        };
        let identifier = self.method_ident(method)?;
        let _ = write!(prototype, "\n{returns}\n{identifier}({}\n)", arguments.join(","));
        let _ = writeln!(self.unit.function_declarations, "{prototype};");

        if declaring_def.is_value_type() && !def.is_static && !def.is_constructor() {
            let object = self.metadata.well_known().object;
            let mut thunk_arguments = vec![format!("\n\t{} a_0", self.scoped_type(object)?)];
            thunk_arguments.extend(arguments.iter().skip(1).cloned());
            let ident = self.escape_type(declaring)?;
            let mut forwarded = vec![format!("&static_cast<{ident}*>(a_0)->v__value")];
            forwarded.extend((1..arguments.len()).map(|i| format!("std::move(a_{i})")));
            let ret = if returns == "void" { "" } else { "return " };
            let _ = writeln!(
                self.unit.function_declarations,
                "\ninline {returns}\n{identifier}__v({}\n)\n{{\n\t{ret}{identifier}({});\n}}",
                thunk_arguments.join(","),
                forwarded.join(", ")
            );
        }

        let partition = self.partition(method);
        if let Some(body) = body {
            self.unit
                .function_definitions
                .push((partition, format!("{prototype}\n{{\n{body}}}\n")));
            return Ok(());
        }
        if def.pinvoke.is_some() {
            let text = self.emit_pinvoke(method, &prototype, &returns)?;
            self.unit.function_definitions.push((partition, text));
            return Ok(());
        }
        if def.body.is_none() {
            if matches!(declaring_def.kind, TypeKind::Array { .. })
                && matches!(key, MethodKey::ArrayAccessor { .. })
            {
                return Err(Error::MissingBuiltin(self.metadata.method_name(method)));
            }
            self.unit.function_declarations.push_str("// TO BE PROVIDED\n");
            return Ok(());
        }
        let text = self.translate(method, &prototype)?;
        self.unit.function_definitions.push((partition, text));
        Ok(())
    }

    /// Definition file group of a method body.
    fn partition(&self, method: MethodId) -> Partition {
        let def = self.metadata.method(method);
        let declaring = self.metadata.ty(def.declaring);
        if !def.generic_arguments.is_empty() || declaring.is_generic_instance() {
            Partition::Generic
        } else if declaring.is_value_type() || declaring.is_interface() || declaring.is_array() {
            Partition::ValueLike
        } else {
            Partition::Other
        }
    }

    /// Engine hook calling an object's finalizer through its v-table.
    fn emit_finalizer(&mut self) -> Result<()> {
        let object = self.metadata.well_known().object;
        let Some(finalize) = self.metadata.find_method(object, "Finalize") else {
            return Ok(());
        };
        let key = MethodKey::of(&self.metadata, finalize)?;
        let Some(index) = self.layouts.index_of(object, &key) else {
            return Ok(());
        };
        self.unit.finalizer = format!(
            "\nvoid t_engine::f_finalize(t_object* a_p)\n{{\n\treinterpret_cast<void(*)(t_scoped<t_slot_of<t_object>>)>(reinterpret_cast<void**>(a_p->f_type() + 1)[{index}])(t_slot(a_p, t_slot::t_pass()));\n}}\n"
        );
        Ok(())
    }

    /// Process entry point. A `string[]` parameter receives the arguments.
    fn emit_main(&mut self, entry: MethodId) -> Result<()> {
        let def = self.metadata.method(entry).clone();
        let identifier = self.method_ident(entry)?;
        let mut arguments = Vec::new();
        if let Some(parameter) = def.parameters.first() {
            let array = self.escape_type(parameter.ty)?;
            arguments.push(format!("f__new_arguments<{array}>(argc, argv)"));
        }
        let call = format!("{identifier}({})", arguments.join(", "));
        let void = self.metadata.ty(def.return_type).full_name() == "System.Void";
        let invoke = if void {
            format!("\t{call};\n\tint n = 0;\n")
        } else {
            format!("\tauto n = {call};\n")
        };
        self.unit.main = format!(
            "\nint main(int argc, char* argv[])\n{{\n\tusing namespace ilcxx;\n\tstd::setlocale(LC_ALL, \"\");\n\tt_engine::t_options options;\n\tt_engine engine(options, argc, argv);\n\tauto s = std::make_unique<t_static>();\n\tauto ts = std::make_unique<t_thread_static>();\n{invoke}\tengine.f_shutdown();\n\treturn n;\n}}\n"
        );
        Ok(())
    }
}

fn flags(def: &ilcxx_core::MethodDef) -> String {
    let mut flags = String::new();
    for (set, name) in [
        (def.is_static, "static "),
        (def.is_final, "final "),
        (def.is_virtual, "virtual "),
        (def.is_abstract, "abstract "),
        (def.is_new_slot, "newslot "),
        (def.pinvoke.is_some(), "pinvoke "),
    ] {
        if set {
            flags.push_str(name);
        }
    }
    flags.trim_end().to_owned()
}
