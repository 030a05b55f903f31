pub mod assignment;
pub mod device;
pub mod soti_device;

pub use assignment::{
    AssignmentStatus, AssignmentType, Entity as Assignment, Model as AssignmentModel,
    ReturnStatus, ShippingStatus,
};
pub use device::{DeviceStatus, Entity as Device, Model as DeviceModel};
pub use soti_device::{Entity as SotiDevice, Model as SotiDeviceModel};
