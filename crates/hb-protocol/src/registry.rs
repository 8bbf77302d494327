use crate::types::{Access, Code, ParamDef, ParamType, PROTOCOL_TABLE};
use crate::RegistryError;
use hb_transport::{Command, Message};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// Memory a parameter reads from and writes into. Owned by the application,
/// shared with the registry.
pub type Storage = Rc<RefCell<Vec<u8>>>;

pub fn new_storage(len: usize) -> Storage {
    Rc::new(RefCell::new(vec![0u8; len]))
}

/// Point in a protocol read or write at which a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamEvent {
    PreRead,
    PostRead,
    PreWrite,
    PostWrite,
}

/// Reacts to protocol reads and writes of one parameter.
///
/// `data` is the payload involved in the event (empty for `PreRead`).
/// Handlers run on the caller's stack inside `feed_byte`/`tick` and must not block.
pub trait ParamHandler {
    fn handle(&mut self, event: ParamEvent, code: Code, data: &[u8]);
}

impl<F> ParamHandler for F
where
    F: FnMut(ParamEvent, Code, &[u8]),
{
    fn handle(&mut self, event: ParamEvent, code: Code, data: &[u8]) {
        self(event, code, data)
    }
}

pub type BoxedHandler = Box<dyn ParamHandler>;

pub struct ParamDescriptor {
    def: ParamDef,
    storage: Storage,
    len: usize,
    handler: Option<BoxedHandler>,
}

impl ParamDescriptor {
    fn new(def: ParamDef) -> Self {
        Self {
            def,
            storage: new_storage(def.size),
            len: def.size,
            handler: None,
        }
    }

    pub fn code(&self) -> Code {
        self.def.code
    }

    pub fn kind(&self) -> ParamType {
        self.def.kind
    }

    /// Wire size from the protocol table.
    pub fn size(&self) -> usize {
        self.def.size
    }

    pub fn access(&self) -> Access {
        self.def.access
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Number of bound bytes in `storage`.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Copy of the currently bound bytes; `None` while the application holds a
    /// mutable borrow of the storage.
    pub fn read_bytes(&self) -> Option<Vec<u8>> {
        match self.storage.try_borrow() {
            Ok(buf) => Some(buf[..self.len.min(buf.len())].to_vec()),
            Err(_) => {
                warn!(code = %self.def.code, "storage busy, nothing read");
                None
            }
        }
    }

    /// Store `data` into the bound bytes; returns how many were copied.
    pub fn write_bytes(&self, data: &[u8]) -> usize {
        match self.storage.try_borrow_mut() {
            Ok(mut buf) => {
                let n = self.len.min(data.len()).min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                n
            }
            Err(_) => {
                warn!(code = %self.def.code, "storage busy, dropping write");
                0
            }
        }
    }

    fn notify(&mut self, event: ParamEvent, data: &[u8]) -> bool {
        match self.handler.as_mut() {
            Some(h) => {
                h.handle(event, self.def.code, data);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ParamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamDescriptor")
            .field("def", &self.def)
            .field("len", &self.len)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// One descriptor slot per code, indexed by the code's numeric value.
#[derive(Debug)]
pub struct ParamRegistry {
    slots: Vec<Option<ParamDescriptor>>,
}

impl Default for ParamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamRegistry {
    /// Registry holding every parameter of the protocol table.
    pub fn new() -> Self {
        Self::from_table(&PROTOCOL_TABLE)
    }

    /// Registry holding only `defs`; other slots stay empty.
    pub fn from_table(defs: &[ParamDef]) -> Self {
        let top = Code::ALL.iter().map(|c| c.value() as usize).max().unwrap_or(0);
        let mut slots: Vec<Option<ParamDescriptor>> = (0..=top).map(|_| None).collect();
        for def in defs {
            slots[def.code.value() as usize] = Some(ParamDescriptor::new(*def));
        }
        Self { slots }
    }

    pub fn lookup(&self, code: Code) -> Option<&ParamDescriptor> {
        self.slots.get(code.value() as usize).and_then(Option::as_ref)
    }

    fn lookup_mut(&mut self, code: Code) -> Result<&mut ParamDescriptor, RegistryError> {
        self.slots
            .get_mut(code.value() as usize)
            .and_then(Option::as_mut)
            .ok_or(RegistryError::Unregistered(code))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamDescriptor> {
        self.slots.iter().flatten()
    }

    /// Point `code` at new storage. Type and access mode stay as defined by the table.
    pub fn bind(&mut self, code: Code, storage: Storage, len: usize) -> Result<(), RegistryError> {
        let desc = self.lookup_mut(code)?;
        let capacity = storage.try_borrow().map(|b| b.len()).unwrap_or(0);
        if len > capacity {
            return Err(RegistryError::LengthExceedsStorage { len, capacity });
        }
        desc.storage = storage;
        desc.len = len;
        debug!(%code, len, "rebound parameter storage");
        Ok(())
    }

    /// Install `handler` (or none) for `code`, returning whatever was installed before.
    pub fn register_or_replace(
        &mut self,
        code: Code,
        handler: Option<BoxedHandler>,
    ) -> Result<Option<BoxedHandler>, RegistryError> {
        let desc = self.lookup_mut(code)?;
        Ok(std::mem::replace(&mut desc.handler, handler))
    }

    /// Run the handler of `code` for `event`. Returns false when none is installed.
    pub fn notify(
        &mut self,
        code: Code,
        event: ParamEvent,
        data: &[u8],
    ) -> Result<bool, RegistryError> {
        Ok(self.lookup_mut(code)?.notify(event, data))
    }

    /// Bound bytes of `code` after giving its handler a `PreRead` look.
    pub fn read_for_send(&mut self, code: Code) -> Result<Vec<u8>, RegistryError> {
        let desc = self.lookup_mut(code)?;
        desc.notify(ParamEvent::PreRead, &[]);
        desc.read_bytes().ok_or(RegistryError::StorageBusy(code))
    }

    /// Apply an inbound message to the registry and build the reply, if any.
    pub fn dispatch(&mut self, msg: &Message) -> Result<Option<Message>, RegistryError> {
        let code = Code::try_from(msg.code())?;
        let desc = self.lookup_mut(code)?;
        debug!(%code, command = ?msg.command(), len = msg.payload().len(), "dispatch");
        match msg.command() {
            Command::ReadResponse => {
                desc.write_bytes(msg.payload());
                desc.notify(ParamEvent::PostRead, msg.payload());
                Ok(None)
            }
            Command::WriteRequest => {
                if !desc.access().writable() {
                    warn!(%code, "peer wrote a read-only parameter");
                    return Err(RegistryError::AccessDenied(code, "write"));
                }
                desc.notify(ParamEvent::PreWrite, msg.payload());
                desc.write_bytes(msg.payload());
                desc.notify(ParamEvent::PostWrite, msg.payload());
                Ok(Message::new(msg.class(), Command::WriteResponse, msg.code(), &[]))
            }
            Command::ReadRequest => {
                if !desc.access().readable() {
                    warn!(%code, "peer read a write-only parameter");
                    return Err(RegistryError::AccessDenied(code, "read"));
                }
                desc.notify(ParamEvent::PreRead, &[]);
                let bytes = desc.read_bytes().ok_or(RegistryError::StorageBusy(code))?;
                Message::new(msg.class(), Command::ReadResponse, msg.code(), &bytes)
                    .map(Some)
                    .ok_or(RegistryError::PayloadTooLarge(bytes.len()))
            }
            Command::WriteResponse => {
                debug!(%code, "write acknowledged by peer");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hb_transport::DeliveryClass;
    use std::cell::Cell;

    #[test]
    fn test_bind_then_lookup_every_code() {
        let mut reg = ParamRegistry::new();
        for code in Code::ALL {
            let size = reg.lookup(code).unwrap().size();
            let storage = new_storage(size + 3);
            reg.bind(code, storage.clone(), size).unwrap();
            let desc = reg.lookup(code).unwrap();
            assert!(Rc::ptr_eq(desc.storage(), &storage));
            assert_eq!(desc.len(), size);
        }
    }

    #[test]
    fn test_bind_unregistered_fails() {
        let defs: Vec<ParamDef> = PROTOCOL_TABLE
            .iter()
            .copied()
            .filter(|d| d.code != Code::SetBuzzer)
            .collect();
        let mut reg = ParamRegistry::from_table(&defs);
        assert!(reg.lookup(Code::SetBuzzer).is_none());
        let err = reg.bind(Code::SetBuzzer, new_storage(4), 4).unwrap_err();
        assert!(matches!(err, RegistryError::Unregistered(Code::SetBuzzer)));
    }

    #[test]
    fn test_bind_keeps_type_and_access() {
        let mut reg = ParamRegistry::new();
        reg.bind(Code::SensHall, new_storage(1), 1).unwrap();
        let desc = reg.lookup(Code::SensHall).unwrap();
        assert_eq!(desc.kind(), ParamType::Struct);
        assert_eq!(desc.access(), Access::ReadOnly);
        assert_eq!(desc.size(), 40);
    }

    #[test]
    fn test_bind_rejects_length_beyond_storage() {
        let mut reg = ParamRegistry::new();
        let err = reg.bind(Code::EnableMotors, new_storage(1), 2).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::LengthExceedsStorage {
                len: 2,
                capacity: 1
            }
        ));
    }

    #[test]
    fn test_replace_returns_previous_handler() {
        let mut reg = ParamRegistry::new();
        let noop = || -> BoxedHandler { Box::new(|_: ParamEvent, _: Code, _: &[u8]| {}) };
        let first = reg
            .register_or_replace(Code::EnableMotors, Some(noop()))
            .unwrap();
        assert!(first.is_none());
        let second = reg
            .register_or_replace(Code::EnableMotors, Some(noop()))
            .unwrap();
        assert!(second.is_some());
        let removed = reg.register_or_replace(Code::EnableMotors, None).unwrap();
        assert!(removed.is_some());
        assert!(!reg.lookup(Code::EnableMotors).unwrap().has_handler());
    }

    #[test]
    fn test_read_response_stores_and_notifies() {
        let mut reg = ParamRegistry::new();
        let seen = Rc::new(Cell::new(0usize));
        let seen2 = seen.clone();
        reg.register_or_replace(
            Code::ProtocolVersion,
            Some(Box::new(move |ev: ParamEvent, _: Code, data: &[u8]| {
                if ev == ParamEvent::PostRead {
                    seen2.set(data.len());
                }
            })),
        )
        .unwrap();
        let msg = Message::new(
            DeliveryClass::NoAck,
            Command::ReadResponse,
            Code::ProtocolVersion.value(),
            &[1, 2, 3, 4],
        )
        .unwrap();
        assert!(reg.dispatch(&msg).unwrap().is_none());
        assert_eq!(seen.get(), 4);
        let bytes = reg.lookup(Code::ProtocolVersion).unwrap().read_bytes().unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_short_payload_only_touches_prefix() {
        let mut reg = ParamRegistry::new();
        let storage = Rc::new(RefCell::new(vec![9u8; 4]));
        reg.bind(Code::ProtocolVersion, storage.clone(), 4).unwrap();
        let msg = Message::new(DeliveryClass::Ack, Command::ReadResponse, 0x00, &[1]).unwrap();
        reg.dispatch(&msg).unwrap();
        assert_eq!(*storage.borrow(), vec![1, 9, 9, 9]);
    }

    #[test]
    fn test_write_request_is_answered() {
        let mut reg = ParamRegistry::new();
        let msg = Message::new(
            DeliveryClass::Ack,
            Command::WriteRequest,
            Code::EnableMotors.value(),
            &[1],
        )
        .unwrap();
        let reply = reg.dispatch(&msg).unwrap().unwrap();
        assert_eq!(reply.command(), Command::WriteResponse);
        assert_eq!(reply.class(), DeliveryClass::Ack);
        assert!(reply.payload().is_empty());
        assert_eq!(
            reg.lookup(Code::EnableMotors).unwrap().read_bytes(),
            Some(vec![1])
        );
    }

    #[test]
    fn test_write_to_read_only_is_refused() {
        let mut reg = ParamRegistry::new();
        let msg = Message::new(
            DeliveryClass::Ack,
            Command::WriteRequest,
            Code::SensHall.value(),
            &[0; 40],
        )
        .unwrap();
        assert!(matches!(
            reg.dispatch(&msg),
            Err(RegistryError::AccessDenied(Code::SensHall, _))
        ));
    }

    #[test]
    fn test_read_request_returns_bound_bytes() {
        let mut reg = ParamRegistry::new();
        let storage = Rc::new(RefCell::new(vec![7u8]));
        reg.bind(Code::DebugOut, storage, 1).unwrap();
        let msg = Message::new(
            DeliveryClass::NoAck,
            Command::ReadRequest,
            Code::DebugOut.value(),
            &[],
        )
        .unwrap();
        let reply = reg.dispatch(&msg).unwrap().unwrap();
        assert_eq!(reply.command(), Command::ReadResponse);
        assert_eq!(reply.payload(), vec![7]);
    }

    #[test]
    fn test_unknown_code_is_reported() {
        let mut reg = ParamRegistry::new();
        let msg = Message::new(DeliveryClass::Ack, Command::ReadResponse, 0x7F, &[]).unwrap();
        assert!(matches!(
            reg.dispatch(&msg),
            Err(RegistryError::UnknownCode(0x7F))
        ));
    }

    #[test]
    fn test_busy_storage_is_not_read_as_zeros() {
        let mut reg = ParamRegistry::new();
        let storage = Rc::new(RefCell::new(vec![5u8]));
        reg.bind(Code::DebugOut, storage.clone(), 1).unwrap();
        let held = storage.borrow_mut();
        assert_eq!(reg.lookup(Code::DebugOut).unwrap().read_bytes(), None);
        assert!(matches!(
            reg.read_for_send(Code::DebugOut),
            Err(RegistryError::StorageBusy(Code::DebugOut))
        ));
        let msg = Message::new(
            DeliveryClass::NoAck,
            Command::ReadRequest,
            Code::DebugOut.value(),
            &[],
        )
        .unwrap();
        assert!(matches!(
            reg.dispatch(&msg),
            Err(RegistryError::StorageBusy(Code::DebugOut))
        ));
        drop(held);
        assert_eq!(reg.read_for_send(Code::DebugOut).unwrap(), vec![5]);
    }
}
