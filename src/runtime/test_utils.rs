//! Test utilities for runtime testing
//!
//! Builds a one-function module around an instruction sequence, instantiates
//! it in a fresh Store and invokes it, so operator tests run through the same
//! path as real calls.

#[cfg(test)]
pub mod test {
    use std::rc::Rc;

    use crate::parser::instruction::InstructionKind;
    use crate::parser::module::{
        ConstExpr, Export, ExportIndex, FunctionBody, FunctionType, Global, GlobalType, Limits, Locals, MemoryType,
        Module, ValueType,
    };
    use crate::runtime::{Imports, Store, StoreConfig, Trap, Value};

    /// Test builder for creating executor tests fluently
    pub struct ExecutorTest {
        instructions: Vec<InstructionKind>,
        args: Vec<Value>,
        locals: Vec<ValueType>,
        return_types: Vec<ValueType>,
        globals: Vec<Global>,
        with_memory: bool,
        config: StoreConfig,
    }

    impl ExecutorTest {
        pub fn new() -> Self {
            ExecutorTest {
                instructions: Vec::new(),
                args: Vec::new(),
                locals: Vec::new(),
                return_types: Vec::new(),
                globals: Vec::new(),
                with_memory: false,
                config: StoreConfig::default(),
            }
        }

        /// Give the module one page of memory with no maximum.
        pub fn with_memory(mut self) -> Self {
            self.with_memory = true;
            self
        }

        pub fn config(mut self, config: StoreConfig) -> Self {
            self.config = config;
            self
        }

        pub fn inst(mut self, kind: InstructionKind) -> Self {
            self.instructions.push(kind);
            self
        }

        /// Add an argument; the function's parameter list follows the
        /// argument types.
        pub fn arg(mut self, value: Value) -> Self {
            self.args.push(value);
            self
        }

        pub fn args(mut self, args: Vec<Value>) -> Self {
            self.args = args;
            self
        }

        /// Declare a local after the parameters.
        pub fn local(mut self, value_type: ValueType) -> Self {
            self.locals.push(value_type);
            self
        }

        /// Define a module global initialized to `value`.
        pub fn global(mut self, global_type: GlobalType, value: Value) -> Self {
            let init = match value {
                Value::I32(v) => ConstExpr::I32(v),
                Value::I64(v) => ConstExpr::I64(v),
                Value::F32(v) => ConstExpr::F32(v),
                Value::F64(v) => ConstExpr::F64(v),
                Value::FuncRef(_) => ConstExpr::RefNull,
            };
            self.globals.push(Global { global_type, init });
            self
        }

        pub fn returns(mut self, types: Vec<ValueType>) -> Self {
            self.return_types = types;
            self
        }

        fn build(mut self) -> (Module, Vec<Value>, StoreConfig) {
            self.instructions.push(InstructionKind::End);
            let params = self.args.iter().map(Value::typ).collect();
            let locals = Locals::new(self.locals.into_iter().map(|vt| (1, vt)).collect());
            let body = FunctionBody::new(locals, self.instructions).expect("well-formed test body");
            let memories = if self.with_memory {
                vec![MemoryType {
                    limits: Limits { min: 1, max: None },
                }]
            } else {
                vec![]
            };
            let module = Module {
                types: vec![FunctionType::new(params, self.return_types)],
                functions: vec![0],
                memories,
                globals: self.globals,
                exports: vec![Export {
                    name: "test".to_string(),
                    index: ExportIndex::Function(0),
                }],
                code: vec![body],
                ..Default::default()
            };
            (module, self.args, self.config)
        }

        pub fn run(self) -> Result<Vec<Value>, Trap> {
            let (module, args, config) = self.build();
            let mut store = Store::with_config(config);
            let instance = store
                .instantiate(Rc::new(module), &Imports::new())
                .expect("test module instantiates");
            store.invoke(&instance, "test", &args)
        }

        pub fn expect_stack(self, expected: Vec<Value>) {
            assert_eq!(self.run(), Ok(expected));
        }

        pub fn expect_trap(self, expected: Trap) {
            assert_eq!(self.run(), Err(expected));
        }

        /// Expect a trap whose message contains `message`.
        pub fn expect_error(self, message: &str) {
            match self.run() {
                Err(trap) => assert!(
                    trap.to_string().contains(message),
                    "expected error containing {:?}, got {:?}",
                    message,
                    trap.to_string()
                ),
                Ok(values) => panic!("expected error containing {:?}, got {:?}", message, values),
            }
        }
    }
}
