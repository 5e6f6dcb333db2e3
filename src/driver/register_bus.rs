use crate::error::Result;
use crate::modbus::ModbusRtuClient;

/// Single-register access to the wallbox, one transaction per call.
#[async_trait::async_trait]
pub trait RegisterBus: Send {
    async fn read_register(&mut self, address: u16) -> Result<u16>;

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()>;
}

#[async_trait::async_trait]
impl RegisterBus for ModbusRtuClient {
    async fn read_register(&mut self, address: u16) -> Result<u16> {
        self.read_input_register(address).await
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.write_single_register(address, value).await
    }
}
