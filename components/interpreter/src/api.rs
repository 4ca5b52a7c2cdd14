//! The host embedding surface.
//!
//! [`Engine`] wraps one [`Context`] behind the operations an embedder
//! needs: parse and run source, exchange values, manage lifetimes,
//! register native functions, attach native handles, and snapshot
//! compiled code. Completions returned to the host keep the engine's
//! error-flag convention: check [`Value::is_abrupt`] before use.

use crate::context::{Context, ContextConfig, ExternalHandlerFn};
use crate::conversion;
use crate::function;
use crate::lex_env;
use crate::objects::{self, PropertyDescriptor};
use crate::provider::BuiltinProvider;
use crate::vm;
use bytecode_system::{snapshot, CodeFlags, CompiledCode};
use core_types::{EnginePort, ErrorKind, Value};
use memory_manager::{InternalSlot, NativeHandleSlot, PropertySlot};
use parser::{parse_program, ParseError, ProgramKind};
use std::rc::Rc;

/// The embeddable engine: one context plus the host-facing API.
pub struct Engine {
    ctx: Context,
}

impl Engine {
    /// An engine without a built-in library.
    pub fn new() -> Self {
        Engine { ctx: Context::new() }
    }

    /// An engine with the given built-in provider installed.
    pub fn with_provider(provider: Rc<dyn BuiltinProvider>) -> Self {
        Engine {
            ctx: Context::with_provider(provider),
        }
    }

    /// A fully configured engine.
    pub fn with_parts(
        provider: Option<Rc<dyn BuiltinProvider>>,
        config: ContextConfig,
        port: Box<dyn EnginePort>,
    ) -> Self {
        Engine {
            ctx: Context::with_parts(provider, config, port),
        }
    }

    /// Direct access to the context for advanced embedders.
    pub fn context(&mut self) -> &mut Context {
        &mut self.ctx
    }

    // ----- compile and run ----------------------------------------------

    /// Compiles global-scope source text.
    pub fn parse(&mut self, source: &str, strict: bool) -> Result<CompiledCode, ParseError> {
        parse_program(source, strict, ProgramKind::Global)
    }

    /// Runs a compiled-code blob against the global environment.
    pub fn run(&mut self, code: &CompiledCode) -> Value {
        let global = self.ctx.global_object();
        self.ctx.heap.ref_cell(global);
        let this = Value::object_ptr(global);
        let env = self.ctx.global_env();
        let is_eval = code.flags.contains(CodeFlags::EVAL_CODE);
        let result = vm::vm_run(&mut self.ctx, code, this, env, is_eval, None, &[]);
        self.ctx.heap.free_value(this);
        self.ctx.check_heap_fatal();
        result
    }

    /// Compiles and runs source as eval code; parse errors surface as
    /// `SyntaxError` completions.
    pub fn eval(&mut self, source: &str, strict: bool) -> Value {
        match parse_program(source, strict, ProgramKind::Eval) {
            Ok(code) => self.run(&code),
            Err(error) => self.ctx.throw_error(error.kind, &error.message),
        }
    }

    // ----- snapshots ----------------------------------------------------

    /// Compiles source and serializes the blob into a snapshot buffer.
    pub fn parse_and_save_snapshot(
        &mut self,
        source: &str,
        global: bool,
        strict: bool,
    ) -> Result<Vec<u8>, ParseError> {
        let kind = if global {
            ProgramKind::Global
        } else {
            ProgramKind::Eval
        };
        let code = parse_program(source, strict, kind)?;
        Ok(snapshot::save(&code))
    }

    /// Executes a snapshot buffer.
    ///
    /// The loaded byte-code is always materialized into engine-owned
    /// structures; `copy_bytecode` is accepted for interface
    /// compatibility with embeddings that can execute host-owned
    /// buffers in place.
    pub fn exec_snapshot(&mut self, bytes: &[u8], _copy_bytecode: bool) -> Value {
        match snapshot::load(bytes) {
            Ok(code) => self.run(&code),
            Err(error) => self.ctx.throw_error(ErrorKind::SyntaxError, &error.to_string()),
        }
    }

    // ----- value introspection ------------------------------------------

    /// True for `undefined`.
    pub fn is_undefined(&self, value: Value) -> bool {
        value.is_undefined()
    }

    /// True for `null`.
    pub fn is_null(&self, value: Value) -> bool {
        value.is_null()
    }

    /// True for booleans.
    pub fn is_boolean(&self, value: Value) -> bool {
        value.is_boolean()
    }

    /// True for numbers.
    pub fn is_number(&self, value: Value) -> bool {
        value.is_number()
    }

    /// True for strings.
    pub fn is_string(&self, value: Value) -> bool {
        value.is_string()
    }

    /// True for objects.
    pub fn is_object(&self, value: Value) -> bool {
        value.is_object()
    }

    /// True for callable objects.
    pub fn is_function(&self, value: Value) -> bool {
        function::is_callable(&self.ctx, value)
    }

    /// True for arrays.
    pub fn is_array(&self, value: Value) -> bool {
        value.is_object()
            && self.ctx.heap.object(value.as_object_ptr()).kind
                == memory_manager::ObjectKind::Array
    }

    /// Numeric payload of a number value.
    pub fn get_number(&self, value: Value) -> f64 {
        self.ctx.heap.number_of(value)
    }

    /// Boolean payload.
    pub fn get_boolean(&self, value: Value) -> bool {
        value.as_boolean()
    }

    /// Copies a string value into a host buffer.
    pub fn get_string(&self, value: Value) -> String {
        self.ctx.string_text(value).to_string()
    }

    /// Byte length of a string value.
    pub fn get_string_size(&self, value: Value) -> usize {
        self.ctx.string_text(value).len()
    }

    /// `length` of an array value.
    pub fn get_array_length(&self, value: Value) -> Option<u32> {
        if !self.is_array(value) {
            return None;
        }
        Some(objects::array_length(&self.ctx, value.as_object_ptr()))
    }

    // ----- property access ----------------------------------------------

    /// Reads a property; the result is owned by the caller.
    pub fn get_property(&mut self, object: Value, name: &str) -> Value {
        if !object.is_object() {
            return self.ctx.throw_type_error("value is not an object");
        }
        objects::get(&mut self.ctx, object.as_object_ptr(), name, object)
    }

    /// Writes a property.
    pub fn set_property(&mut self, object: Value, name: &str, value: Value) -> Value {
        if !object.is_object() {
            return self.ctx.throw_type_error("value is not an object");
        }
        objects::put(&mut self.ctx, object.as_object_ptr(), name, value, false, object)
    }

    /// Reads an indexed property.
    pub fn get_property_by_index(&mut self, object: Value, index: u32) -> Value {
        self.get_property(object, &index.to_string())
    }

    /// Writes an indexed property.
    pub fn set_property_by_index(&mut self, object: Value, index: u32, value: Value) -> Value {
        self.set_property(object, &index.to_string(), value)
    }

    /// `[[DefineOwnProperty]]` with a full descriptor.
    pub fn define_own_property(
        &mut self,
        object: Value,
        name: &str,
        descriptor: &PropertyDescriptor,
    ) -> Value {
        if !object.is_object() {
            return self.ctx.throw_type_error("value is not an object");
        }
        objects::define_own_property(
            &mut self.ctx,
            object.as_object_ptr(),
            name,
            descriptor,
            true,
        )
    }

    /// Reads an own property descriptor.
    pub fn get_own_property_descriptor(
        &mut self,
        object: Value,
        name: &str,
    ) -> Option<PropertyDescriptor> {
        if !object.is_object() {
            return None;
        }
        let node_ptr = objects::get_own_property(&mut self.ctx, object.as_object_ptr(), name)?;
        let node = *self.ctx.heap.property(node_ptr);
        let mut descriptor = PropertyDescriptor {
            enumerable: Some(node.attrs.enumerable),
            configurable: Some(node.attrs.configurable),
            ..Default::default()
        };
        match node.slot {
            PropertySlot::Value(value) => {
                descriptor.value = Some(self.ctx.heap.copy_value(value));
                descriptor.writable = Some(node.attrs.writable);
            }
            PropertySlot::Accessor { getter, setter } => {
                descriptor.getter = Some(if getter.is_null() {
                    Value::UNDEFINED
                } else {
                    self.ctx.heap.ref_cell(getter);
                    Value::object_ptr(getter)
                });
                descriptor.setter = Some(if setter.is_null() {
                    Value::UNDEFINED
                } else {
                    self.ctx.heap.ref_cell(setter);
                    Value::object_ptr(setter)
                });
            }
            PropertySlot::Internal(_) => return None,
        }
        Some(descriptor)
    }

    /// Visits every own named property. The callback returns false to
    /// stop the walk early.
    pub fn foreach_object_property(
        &mut self,
        object: Value,
        mut callback: impl FnMut(&mut Context, &str, Value) -> bool,
    ) {
        if !object.is_object() {
            return;
        }
        let mut names = Vec::new();
        let mut hidden = Vec::new();
        objects::own_property_names(
            &mut self.ctx,
            object.as_object_ptr(),
            &mut names,
            Some(&mut hidden),
        );
        names.extend(hidden);
        for name in names {
            let value = objects::get(&mut self.ctx, object.as_object_ptr(), &name, object);
            if value.is_abrupt() {
                self.ctx.heap.free_value(value);
                continue;
            }
            let keep_going = callback(&mut self.ctx, &name, value);
            self.ctx.heap.free_value(value);
            if !keep_going {
                return;
            }
        }
    }

    /// The `[[Prototype]]` of an object value.
    pub fn get_prototype(&self, object: Value) -> Value {
        if !object.is_object() {
            return Value::NULL;
        }
        let proto = self.ctx.heap.object(object.as_object_ptr()).prototype;
        if proto.is_null() {
            Value::NULL
        } else {
            Value::object_ptr(proto)
        }
    }

    /// Replaces the `[[Prototype]]` of an object value.
    pub fn set_prototype(&mut self, object: Value, prototype: Value) -> Value {
        if !object.is_object() {
            return self.ctx.throw_type_error("value is not an object");
        }
        let new_proto = if prototype.is_object() {
            let ptr = prototype.as_object_ptr();
            self.ctx.heap.ref_cell(ptr);
            ptr
        } else {
            core_types::CompactPtr::NULL
        };
        let object_ptr = object.as_object_ptr();
        let old = self.ctx.heap.object(object_ptr).prototype;
        self.ctx.heap.object_mut(object_ptr).prototype = new_proto;
        if !old.is_null() {
            self.ctx.heap.deref_cell(old);
        }
        Value::TRUE
    }

    // ----- value construction -------------------------------------------

    /// Creates a number value.
    pub fn create_number(&mut self, value: f64) -> Value {
        self.ctx.make_number(value)
    }

    /// Creates a boolean value.
    pub fn create_boolean(&mut self, value: bool) -> Value {
        Value::boolean(value)
    }

    /// Creates a string value.
    pub fn create_string(&mut self, text: &str) -> Value {
        self.ctx.alloc_string(text)
    }

    /// Creates a plain object.
    pub fn create_object(&mut self) -> Value {
        objects::create_plain_object(&mut self.ctx)
    }

    /// Creates an array of the given length (elements are holes).
    pub fn create_array(&mut self, length: u32) -> Value {
        objects::create_array(&mut self.ctx, length)
    }

    /// Creates an error object (without the error flag).
    pub fn create_error(&mut self, kind: ErrorKind, message: &str) -> Value {
        self.ctx.create_error(kind, message)
    }

    /// Registers a native function and wraps it in a callable object.
    pub fn create_external_function(&mut self, handler: ExternalHandlerFn) -> Value {
        let id = self.ctx.register_external(handler);
        function::create_external_function(&mut self.ctx, id)
    }

    /// Binds a value as a property of the global object.
    pub fn set_global(&mut self, name: &str, value: Value) {
        let global = self.ctx.global_object();
        let receiver = Value::object_ptr(global);
        let result = objects::put(&mut self.ctx, global, name, value, false, receiver);
        self.ctx.heap.free_value(result);
    }

    /// Reads a global binding.
    pub fn get_global(&mut self, name: &str) -> Value {
        let env = self.ctx.global_env();
        lex_env::get_ident_value(&mut self.ctx, env, name)
    }

    /// Calls a function value from the host.
    pub fn call(&mut self, func: Value, this: Value, args: &[Value]) -> Value {
        function::op_function_call(&mut self.ctx, func, this, args)
    }

    /// Converts a value to a host-readable string (ToString).
    pub fn to_display_string(&mut self, value: Value) -> String {
        let string = conversion::to_string_value(&mut self.ctx, value);
        if string.is_abrupt() {
            self.ctx.heap.free_value(string);
            return "<uncoercible value>".to_string();
        }
        let text = self.ctx.string_text(string).to_string();
        self.ctx.heap.free_value(string);
        text
    }

    // ----- lifetime -----------------------------------------------------

    /// Takes a host reference on a value.
    pub fn acquire_value(&mut self, value: Value) -> Value {
        self.ctx.acquire(value)
    }

    /// Releases a host reference.
    pub fn release_value(&mut self, value: Value) {
        self.ctx.release(value);
    }

    /// Frees a value reference that the engine handed out (results of
    /// `eval`, `get_property`, `create_*`).
    pub fn free_value(&mut self, value: Value) {
        self.ctx.heap.free_value(value);
    }

    /// Runs a full garbage collection.
    pub fn gc(&mut self) -> usize {
        self.ctx.collect_garbage()
    }

    // ----- native handles -----------------------------------------------

    /// Attaches (or replaces) an object's native handle. Replacing an
    /// existing handle does not invoke its free callback; the embedder
    /// owns that transition.
    pub fn set_object_native_handle(
        &mut self,
        object: Value,
        data: usize,
        free_callback: Option<fn(usize)>,
    ) {
        if !object.is_object() {
            return;
        }
        let ptr = object.as_object_ptr();
        let slot = NativeHandleSlot {
            data,
            free_callback,
        };
        if let Some(node) = self
            .ctx
            .find_internal_property(ptr, |s| matches!(s, InternalSlot::NativeHandle(_)))
        {
            self.ctx.heap.property_mut(node).slot =
                PropertySlot::Internal(InternalSlot::NativeHandle(slot));
        } else {
            self.ctx
                .add_internal_property(ptr, InternalSlot::NativeHandle(slot));
        }
    }

    /// Reads an object's native handle.
    pub fn get_object_native_handle(&self, object: Value) -> Option<usize> {
        if !object.is_object() {
            return None;
        }
        let node = self.ctx.find_internal_property(object.as_object_ptr(), |s| {
            matches!(s, InternalSlot::NativeHandle(_))
        })?;
        match self.ctx.heap.property(node).slot {
            PropertySlot::Internal(InternalSlot::NativeHandle(slot)) => Some(slot.data),
            _ => None,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_returns_completion_value() {
        let mut engine = Engine::new();
        let result = engine.eval("6 * 7", false);
        assert!(result.is_number());
        assert_eq!(engine.get_number(result), 42.0);
        engine.free_value(result);
    }

    #[test]
    fn test_eval_syntax_error_is_abrupt() {
        let mut engine = Engine::new();
        let result = engine.eval("var = ;", false);
        assert!(result.is_abrupt());
        engine.free_value(result);
    }

    #[test]
    fn test_property_round_trip() {
        let mut engine = Engine::new();
        let object = engine.create_object();
        let value = engine.create_string("payload");
        let set = engine.set_property(object, "key", value);
        assert_eq!(set, Value::TRUE);
        let read = engine.get_property(object, "key");
        assert_eq!(engine.get_string(read), "payload");
        engine.free_value(read);
        engine.free_value(value);
        engine.free_value(object);
    }

    #[test]
    fn test_indexed_properties_and_array() {
        let mut engine = Engine::new();
        let array = engine.create_array(0);
        let v = engine.create_number(9.5);
        let set = engine.set_property_by_index(array, 2, v);
        engine.free_value(set);
        assert_eq!(engine.get_array_length(array), Some(3));
        let read = engine.get_property_by_index(array, 2);
        assert_eq!(engine.get_number(read), 9.5);
        engine.free_value(read);
        engine.free_value(v);
        engine.free_value(array);
    }

    #[test]
    fn test_external_function_callable_from_script() {
        fn add_one(ctx: &mut Context, _this: Value, args: &[Value]) -> Value {
            let n = ctx.heap.number_of(args[0]);
            ctx.make_number(n + 1.0)
        }
        let mut engine = Engine::new();
        let func = engine.create_external_function(add_one);
        engine.set_global("addOne", func);
        let result = engine.eval("addOne(41)", false);
        assert_eq!(engine.get_number(result), 42.0);
        engine.free_value(func);
    }

    #[test]
    fn test_snapshot_round_trip_matches_run(){
        let mut engine = Engine::new();
        let source = "var a = 19; var b = 23; a + b";
        let direct = engine.eval(source, false);

        let bytes = engine
            .parse_and_save_snapshot(source, false, false)
            .expect("snapshot saves");
        let replayed = engine.exec_snapshot(&bytes, true);
        assert_eq!(engine.get_number(direct), engine.get_number(replayed));
        engine.free_value(direct);
        engine.free_value(replayed);
    }

    #[test]
    fn test_native_handle_replacement_skips_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static FREED: AtomicUsize = AtomicUsize::new(0);
        fn on_free(_data: usize) {
            FREED.fetch_add(1, Ordering::SeqCst);
        }

        FREED.store(0, Ordering::SeqCst);
        let mut engine = Engine::new();
        let object = engine.create_object();
        engine.set_object_native_handle(object, 0x10, Some(on_free));
        assert_eq!(engine.get_object_native_handle(object), Some(0x10));

        // Replacement must not fire the old callback.
        engine.set_object_native_handle(object, 0x20, Some(on_free));
        assert_eq!(FREED.load(Ordering::SeqCst), 0);
        assert_eq!(engine.get_object_native_handle(object), Some(0x20));

        // Collection of the object fires the current callback once.
        engine.free_value(object);
        assert_eq!(FREED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_descriptor_round_trip() {
        let mut engine = Engine::new();
        let object = engine.create_object();
        let value = engine.create_number(4.0);
        let descriptor = PropertyDescriptor {
            value: Some(value),
            writable: Some(false),
            enumerable: Some(true),
            configurable: Some(false),
            ..Default::default()
        };
        let defined = engine.define_own_property(object, "fixed", &descriptor);
        assert_eq!(defined, Value::TRUE);

        let read = engine.get_own_property_descriptor(object, "fixed").unwrap();
        assert_eq!(read.writable, Some(false));
        assert_eq!(read.enumerable, Some(true));
        assert_eq!(read.configurable, Some(false));
        assert_eq!(engine.get_number(read.value.unwrap()), 4.0);
    }

    #[test]
    fn test_foreach_object_property() {
        let mut engine = Engine::new();
        let result = engine.eval("var o = { a: 1, b: 2 }; o", false);
        assert!(result.is_object());
        let mut seen = Vec::new();
        engine.foreach_object_property(result, |_ctx, name, _value| {
            seen.push(name.to_string());
            true
        });
        assert!(seen.contains(&"a".to_string()));
        assert!(seen.contains(&"b".to_string()));
        engine.free_value(result);
    }

    #[test]
    fn test_prototype_access() {
        let mut engine = Engine::new();
        let proto = engine.create_object();
        let v = engine.create_number(5.0);
        let set = engine.set_property(proto, "inherited", v);
        engine.free_value(set);
        let object = engine.create_object();
        let changed = engine.set_prototype(object, proto);
        engine.free_value(changed);
        assert_eq!(engine.get_prototype(object), proto);
        let read = engine.get_property(object, "inherited");
        assert_eq!(engine.get_number(read), 5.0);
    }
}
