use crate::*;

#[test]
fn method_decode() {
    assert_eq!(Method::Get, Method::from_mask(0x02));
    assert_eq!(Method::Connect, Method::from_mask(0x1_0000));
    assert_eq!(Method::Patch, Method::from_mask(Method::Patch.mask()));
    // No bits set
    assert_eq!(Method::Unknown, Method::from_mask(0));
    // Bits outside the known set
    assert_eq!(Method::Unknown, Method::from_mask(0x8000_0000));
    // Lowest-priority bit wins when several are set
    assert_eq!(Method::Get, Method::from_mask(0x02 | 0x08));
    assert_eq!(Method::Unknown, Method::from_mask(0x01 | 0x04));
    assert_eq!(Method::Head, Method::from_mask(0x04 | 0x1_0000));
}

#[test]
fn reqid_display() {
    assert_eq!("#42", ReqId(42).to_string());
    assert!(ReqId(1) < ReqId(2));
}

#[test]
fn sizes() {
    assert_eq!(19, std::mem::size_of::<PeerSelection>());
    assert_eq!(1, std::mem::align_of::<PeerSelection>());
}
