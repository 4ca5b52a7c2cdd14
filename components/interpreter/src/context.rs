//! The engine context.
//!
//! A [`Context`] is the single record every engine entry point is
//! threaded through: the heap, the global object and environment, the
//! built-in registry cache, the external function table, the values
//! the embedder has acquired, and the operand stack shared by all
//! active frames. A host may hold many contexts as long as each is
//! used single-threaded.

use crate::provider::{BuiltinId, BuiltinProvider, BUILTIN_COUNT};
use core_types::{
    CompactPtr, DefaultPort, EnginePort, ErrorKind, FatalCode, LogLevel, MagicStringId, Value,
};
use memory_manager::{
    BuiltinData, Heap, InternalSlot, ObjectData, ObjectKind, ObjectRecord, PropertyAttrs,
    PropertyName, PropertyNode, PropertySlot,
};
use std::rc::Rc;

/// Signature of host functions registered through the embedding
/// surface. The handler receives the context, the `this` value, and
/// the argument slice; its return value (possibly an abrupt
/// completion) flows back to script.
pub type ExternalHandlerFn = fn(&mut Context, Value, &[Value]) -> Value;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Heap arena capacity in cells.
    pub heap_cells: usize,
    /// Diagnostic verbosity routed through the port.
    pub log_level: LogLevel,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            heap_cells: memory_manager::DEFAULT_CELL_CAPACITY,
            log_level: LogLevel::Warning,
        }
    }
}

/// The engine context record.
pub struct Context {
    /// The cell arena.
    pub heap: Heap,
    port: Box<dyn EnginePort>,
    provider: Option<Rc<dyn BuiltinProvider>>,
    builtin_objects: Vec<Option<CompactPtr>>,
    external_handlers: Vec<ExternalHandlerFn>,
    global_object: CompactPtr,
    global_env: CompactPtr,
    thrower: Option<CompactPtr>,
    acquired: Vec<Value>,
    /// Operand stack shared by every active frame; slots own one
    /// reference each and are part of the collector's root set.
    pub(crate) stack: Vec<Value>,
    /// Per-frame roots that are not operand slots: `this` bindings,
    /// environment heads, handler-saved environments, pending
    /// completions, for-in iterator objects.
    pub(crate) frame_roots: Vec<Value>,
}

impl Context {
    /// Creates a context without a built-in library (bare global
    /// object); used by unit tests and minimal embeddings.
    pub fn new() -> Self {
        Context::with_parts(None, ContextConfig::default(), Box::new(DefaultPort::new()))
    }

    /// Creates a context with a built-in provider.
    pub fn with_provider(provider: Rc<dyn BuiltinProvider>) -> Self {
        Context::with_parts(
            Some(provider),
            ContextConfig::default(),
            Box::new(DefaultPort::new()),
        )
    }

    /// Creates a fully configured context.
    pub fn with_parts(
        provider: Option<Rc<dyn BuiltinProvider>>,
        config: ContextConfig,
        port: Box<dyn EnginePort>,
    ) -> Self {
        let mut ctx = Context {
            heap: Heap::with_capacity(config.heap_cells),
            port,
            provider,
            builtin_objects: vec![None; BUILTIN_COUNT],
            external_handlers: Vec::new(),
            global_object: CompactPtr::NULL,
            global_env: CompactPtr::NULL,
            thrower: None,
            acquired: Vec::new(),
            stack: Vec::new(),
            frame_roots: Vec::new(),
        };

        // The global object is the Global built-in when a library is
        // installed, a bare object otherwise.
        let global = if ctx.provider.is_some() {
            ctx.builtin_object(BuiltinId::Global)
        } else {
            ctx.alloc_object(ObjectRecord::new(ObjectKind::General, CompactPtr::NULL, true))
        };
        ctx.global_object = global;

        // The global environment is an object environment wrapping the
        // global object and terminating the outer chain.
        ctx.heap.ref_cell(global);
        let mut env = ObjectRecord::new(ObjectKind::LexEnvObject, CompactPtr::NULL, true);
        env.data = ObjectData::LexEnv(memory_manager::LexEnvData {
            outer: CompactPtr::NULL,
            binding_object: global,
            provide_this: false,
        });
        ctx.global_env = ctx.alloc_object(env);
        ctx
    }

    // ----- host services ------------------------------------------------

    /// Terminates through the host port.
    pub fn fatal(&self, code: FatalCode) -> ! {
        self.port.fatal(code)
    }

    /// Routes a diagnostic through the host port.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.port.log(level, message);
    }

    /// Current time from the host port.
    pub fn current_time_ms(&self) -> f64 {
        self.port.current_time_ms()
    }

    /// Surfaces a pending heap fatal (reference count saturation).
    pub fn check_heap_fatal(&mut self) {
        if let Some(code) = self.heap.take_pending_fatal() {
            self.fatal(code);
        }
    }

    // ----- allocation ---------------------------------------------------

    fn retry_after_collect<T>(
        &mut self,
        mut attempt: impl FnMut(&mut Heap) -> Result<T, memory_manager::OutOfMemory>,
    ) -> T {
        match attempt(&mut self.heap) {
            Ok(value) => value,
            Err(_) => {
                self.collect_garbage();
                match attempt(&mut self.heap) {
                    Ok(value) => value,
                    Err(_) => self.fatal(FatalCode::OutOfMemory),
                }
            }
        }
    }

    /// Allocates an object record; collects and retries on pressure.
    pub fn alloc_object(&mut self, record: ObjectRecord) -> CompactPtr {
        match self.heap.alloc_object(record.clone()) {
            Ok(ptr) => ptr,
            Err(_) => {
                self.collect_garbage();
                match self.heap.alloc_object(record) {
                    Ok(ptr) => ptr,
                    Err(_) => self.fatal(FatalCode::OutOfMemory),
                }
            }
        }
    }

    /// Allocates a property node.
    pub fn alloc_property(&mut self, node: PropertyNode) -> CompactPtr {
        self.retry_after_collect(|heap| heap.alloc_property(node))
    }

    /// Builds a number value.
    pub fn make_number(&mut self, value: f64) -> Value {
        self.retry_after_collect(|heap| heap.make_number(value))
    }

    /// Builds a string value (magic table and interned table first).
    pub fn alloc_string(&mut self, text: &str) -> Value {
        self.retry_after_collect(|heap| heap.alloc_string(text))
    }

    /// Builds an interned string value.
    pub fn intern_string(&mut self, text: &str) -> Value {
        self.retry_after_collect(|heap| heap.intern_string(text))
    }

    // ----- roots and collection -----------------------------------------

    /// Runs a full collection with the context's complete root set.
    pub fn collect_garbage(&mut self) -> usize {
        let mut roots: Vec<Value> = Vec::with_capacity(
            4 + self.builtin_objects.len()
                + self.acquired.len()
                + self.stack.len()
                + self.frame_roots.len(),
        );
        if !self.global_object.is_null() {
            roots.push(Value::object_ptr(self.global_object));
        }
        if !self.global_env.is_null() {
            roots.push(Value::object_ptr(self.global_env));
        }
        if let Some(thrower) = self.thrower {
            roots.push(Value::object_ptr(thrower));
        }
        for builtin in self.builtin_objects.iter().flatten() {
            roots.push(Value::object_ptr(*builtin));
        }
        roots.extend_from_slice(&self.acquired);
        roots.extend_from_slice(&self.stack);
        roots.extend_from_slice(&self.frame_roots);
        self.heap.collect(&roots)
    }

    /// Takes a reference for the embedder; the value stays alive until
    /// released.
    pub fn acquire(&mut self, value: Value) -> Value {
        let copied = self.heap.copy_value(value);
        self.acquired.push(copied);
        self.check_heap_fatal();
        copied
    }

    /// Releases a previously acquired value.
    pub fn release(&mut self, value: Value) {
        if let Some(index) = self.acquired.iter().position(|v| *v == value) {
            self.acquired.swap_remove(index);
            self.heap.free_value(value);
        }
    }

    // ----- globals and built-ins ----------------------------------------

    /// The global object.
    pub fn global_object(&self) -> CompactPtr {
        self.global_object
    }

    /// The global lexical environment.
    pub fn global_env(&self) -> CompactPtr {
        self.global_env
    }

    /// The installed built-in provider.
    pub fn provider(&self) -> Option<Rc<dyn BuiltinProvider>> {
        self.provider.clone()
    }

    /// Returns (creating on first use) the object of a built-in id.
    ///
    /// The cache entry owns one reference; callers that store the
    /// pointer take their own.
    pub fn builtin_object(&mut self, id: BuiltinId) -> CompactPtr {
        if let Some(ptr) = self.builtin_objects[id.to_raw() as usize] {
            return ptr;
        }
        let Some(provider) = self.provider.clone() else {
            self.fatal(FatalCode::FailedInternalAssertion);
        };
        let template = provider.template(id);
        let prototype = match template.prototype {
            Some(proto_id) => {
                let proto = self.builtin_object(proto_id);
                self.heap.ref_cell(proto);
                proto
            }
            None => CompactPtr::NULL,
        };
        let kind = if template.callable {
            ObjectKind::BuiltinFunction
        } else {
            ObjectKind::General
        };
        let mut record = ObjectRecord::new(kind, prototype, true);
        record.is_builtin = true;
        record.data = ObjectData::Builtin(BuiltinData {
            builtin_id: id.to_raw(),
            routine_id: 0,
            instantiated_mask: 0,
        });
        let ptr = self.alloc_object(record);
        if let Some(class_tag) = template.class_tag {
            self.add_internal_property(ptr, InternalSlot::ClassTag(class_tag));
        }
        self.builtin_objects[id.to_raw() as usize] = Some(ptr);
        ptr
    }

    /// Creates a routine function object of a built-in.
    pub fn create_builtin_routine(&mut self, id: BuiltinId, routine: u16) -> Value {
        let prototype = if self.provider.is_some() {
            let proto = self.builtin_object(BuiltinId::FunctionPrototype);
            self.heap.ref_cell(proto);
            proto
        } else {
            CompactPtr::NULL
        };
        let mut record = ObjectRecord::new(ObjectKind::BuiltinFunction, prototype, true);
        record.is_builtin = true;
        record.data = ObjectData::Builtin(BuiltinData {
            builtin_id: id.to_raw(),
            routine_id: routine,
            instantiated_mask: 0,
        });
        let ptr = self.alloc_object(record);
        Value::object_ptr(ptr)
    }

    /// The shared thrower accessor: one function object per context
    /// whose only behavior is to throw a `TypeError`.
    pub fn thrower(&mut self) -> CompactPtr {
        if let Some(ptr) = self.thrower {
            return ptr;
        }
        let handler = self.register_external(thrower_handler);
        let prototype = if self.provider.is_some() {
            let proto = self.builtin_object(BuiltinId::FunctionPrototype);
            self.heap.ref_cell(proto);
            proto
        } else {
            CompactPtr::NULL
        };
        let mut record = ObjectRecord::new(ObjectKind::ExternalFunction, prototype, false);
        record.data = ObjectData::External(memory_manager::ExternalFunctionData { handler });
        let ptr = self.alloc_object(record);
        self.thrower = Some(ptr);
        ptr
    }

    /// Registers a host function and returns its handler id.
    pub fn register_external(&mut self, handler: ExternalHandlerFn) -> u32 {
        self.external_handlers.push(handler);
        (self.external_handlers.len() - 1) as u32
    }

    /// Looks up a registered host function.
    pub fn external_handler(&self, id: u32) -> ExternalHandlerFn {
        self.external_handlers[id as usize]
    }

    // ----- property plumbing --------------------------------------------

    /// Appends a property node to an object's chain and returns the
    /// node pointer. The chain keeps insertion order.
    pub fn append_property(&mut self, object: CompactPtr, node: PropertyNode) -> CompactPtr {
        let node_ptr = self.alloc_property(node);
        let mut cursor = self.heap.object(object).properties;
        if cursor.is_null() {
            self.heap.object_mut(object).properties = node_ptr;
            return node_ptr;
        }
        loop {
            let next = self.heap.property(cursor).next;
            if next.is_null() {
                self.heap.property_mut(cursor).next = node_ptr;
                return node_ptr;
            }
            cursor = next;
        }
    }

    /// Adds an internal slot to an object's chain.
    pub fn add_internal_property(&mut self, object: CompactPtr, slot: InternalSlot) -> CompactPtr {
        self.append_property(object, PropertyNode::internal(slot))
    }

    /// Finds an internal slot of the given shape.
    pub fn find_internal_property(
        &self,
        object: CompactPtr,
        matches: impl Fn(&InternalSlot) -> bool,
    ) -> Option<CompactPtr> {
        let mut cursor = self.heap.object(object).properties;
        while !cursor.is_null() {
            let node = self.heap.property(cursor);
            if let PropertySlot::Internal(slot) = &node.slot {
                if matches(slot) {
                    return Some(cursor);
                }
            }
            cursor = node.next;
        }
        None
    }

    /// The `[[Class]]` of an object: internal tag override, else the
    /// kind default.
    pub fn class_of(&self, object: CompactPtr) -> MagicStringId {
        if let Some(node_ptr) =
            self.find_internal_property(object, |slot| matches!(slot, InternalSlot::ClassTag(_)))
        {
            if let PropertySlot::Internal(InternalSlot::ClassTag(tag)) =
                self.heap.property(node_ptr).slot
            {
                return tag;
            }
        }
        match self.heap.object(object).kind {
            ObjectKind::General | ObjectKind::LexEnvDeclarative | ObjectKind::LexEnvObject => {
                MagicStringId::ObjectClass
            }
            ObjectKind::Function
            | ObjectKind::BoundFunction
            | ObjectKind::ExternalFunction
            | ObjectKind::BuiltinFunction => MagicStringId::FunctionClass,
            ObjectKind::Array => MagicStringId::ArrayClass,
            ObjectKind::StringObject => MagicStringId::StringClass,
            ObjectKind::Arguments => MagicStringId::ArgumentsClass,
        }
    }

    // ----- error construction -------------------------------------------

    /// Creates an error object of `kind` carrying `message`, without
    /// the error flag.
    pub fn create_error(&mut self, kind: ErrorKind, message: &str) -> Value {
        let prototype = if self.provider.is_some() {
            let id = match kind {
                ErrorKind::Error => BuiltinId::ErrorPrototype,
                ErrorKind::SyntaxError => BuiltinId::SyntaxErrorPrototype,
                ErrorKind::TypeError => BuiltinId::TypeErrorPrototype,
                ErrorKind::ReferenceError => BuiltinId::ReferenceErrorPrototype,
                ErrorKind::RangeError => BuiltinId::RangeErrorPrototype,
                ErrorKind::UriError => BuiltinId::UriErrorPrototype,
                ErrorKind::EvalError => BuiltinId::EvalErrorPrototype,
            };
            let proto = self.builtin_object(id);
            self.heap.ref_cell(proto);
            proto
        } else {
            CompactPtr::NULL
        };
        let ptr = self.alloc_object(ObjectRecord::new(ObjectKind::General, prototype, true));
        self.add_internal_property(ptr, InternalSlot::ClassTag(MagicStringId::ErrorClass));
        let message_value = self.alloc_string(message);
        self.append_property(
            ptr,
            PropertyNode::data(
                PropertyName::Magic(MagicStringId::Message),
                message_value,
                PropertyAttrs {
                    writable: true,
                    enumerable: false,
                    configurable: true,
                },
            ),
        );
        Value::object_ptr(ptr)
    }

    /// Creates an error object and returns it as an abrupt completion.
    pub fn throw_error(&mut self, kind: ErrorKind, message: &str) -> Value {
        self.log(LogLevel::Debug, &format!("{}: {}", kind, message));
        self.create_error(kind, message).with_error_flag()
    }

    /// `TypeError` abrupt completion shorthand.
    pub fn throw_type_error(&mut self, message: &str) -> Value {
        self.throw_error(ErrorKind::TypeError, message)
    }

    /// `ReferenceError` abrupt completion shorthand.
    pub fn throw_reference_error(&mut self, message: &str) -> Value {
        self.throw_error(ErrorKind::ReferenceError, message)
    }

    // ----- misc ---------------------------------------------------------

    /// Reads the text of a string value.
    pub fn string_text(&self, value: Value) -> &str {
        self.heap.string_text(value)
    }

    /// Frees every slot above `len` on the operand stack.
    pub(crate) fn truncate_stack(&mut self, len: usize) {
        while self.stack.len() > len {
            let value = self.stack.pop().expect("stack underflow");
            self.heap.free_value(value);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("heap", &self.heap)
            .field("stack_depth", &self.stack.len())
            .field("acquired", &self.acquired.len())
            .field("has_provider", &self.provider.is_some())
            .finish()
    }
}

fn thrower_handler(ctx: &mut Context, _this: Value, _args: &[Value]) -> Value {
    ctx.throw_type_error("'caller' and 'arguments' are restricted in strict mode")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_context_has_global() {
        let ctx = Context::new();
        assert!(!ctx.global_object().is_null());
        assert!(!ctx.global_env().is_null());
    }

    #[test]
    fn test_thrower_identity_is_shared() {
        let mut ctx = Context::new();
        let first = ctx.thrower();
        let second = ctx.thrower();
        assert_eq!(first, second);
    }

    #[test]
    fn test_acquire_release_round_trip() {
        let mut ctx = Context::new();
        let value = ctx.alloc_string("held by the embedder");
        let ptr = value.as_string_ptr();
        let held = ctx.acquire(value);
        assert_eq!(ctx.heap.cell_refs(ptr), 2);
        ctx.heap.free_value(value);
        assert_eq!(ctx.heap.cell_refs(ptr), 1);
        // The acquired reference roots the value across collections.
        ctx.collect_garbage();
        assert_eq!(ctx.string_text(held), "held by the embedder");
        ctx.release(held);
    }

    #[test]
    fn test_class_of_defaults() {
        let mut ctx = Context::new();
        let plain = ctx.alloc_object(ObjectRecord::new(
            ObjectKind::General,
            CompactPtr::NULL,
            true,
        ));
        assert_eq!(ctx.class_of(plain), MagicStringId::ObjectClass);
        let array = ctx.alloc_object(ObjectRecord::new(ObjectKind::Array, CompactPtr::NULL, true));
        assert_eq!(ctx.class_of(array), MagicStringId::ArrayClass);
    }

    #[test]
    fn test_create_error_has_message() {
        let mut ctx = Context::new();
        let error = ctx.create_error(ErrorKind::TypeError, "broken");
        assert!(error.is_object());
        let thrown = error.with_error_flag();
        assert!(thrown.is_abrupt());
        assert_eq!(thrown.abrupt_payload(), error);
    }
}
