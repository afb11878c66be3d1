use crate::tensor::Tensor;

#[test]
fn test_inplace_ops() {
    let mut t = Tensor::new(&[1., -2., 3.], &[3]);
    t.scale(2.0);
    assert_eq!(t.as_slice(), &[2., -4., 6.]);

    let other = Tensor::new(&[1., 1., 1.], &[1, 3]);
    t.axpy(-1.0, &other);
    assert_eq!(t.as_slice(), &[1., -5., 5.]);

    let mut dst = Tensor::zeros(&[3, 1]);
    dst.copy_from(&t);
    assert_eq!(dst.shape(), &[3, 1]);
    assert_eq!(dst.as_slice(), t.as_slice());

    dst.fill(0.5);
    assert_eq!(dst.as_slice(), &[0.5, 0.5, 0.5]);
}

#[test]
fn test_reductions() {
    let t = Tensor::new(&[1., -4., 2.], &[3]);
    assert_eq!(t.sum(), -1.);
    assert_eq!(t.asum(), 7.);
    assert_eq!(t.abs_max(), 4.);
    assert_eq!(Tensor::zeros(&[0]).abs_max(), 0.);
}
