use itertools::izip;
use multiversion::multiversion;

#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+sse4.2", "aarch64+neon"))]
pub(crate) fn multiply(x: &[f64], y: &[f64], out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(out.iter_mut(), x, y).for_each(|(out, &x, &y)| {
        *out = x * y;
    });
}

#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+sse4.2", "aarch64+neon"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());
    izip!(a, b).map(|(&x, &y)| x * y).sum()
}

/// y += a * x
#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+sse4.2", "aarch64+neon"))]
pub(crate) fn axpy(x: &[f64], y: &mut [f64], a: f64) {
    let n = x.len();
    assert!(y.len() == n);

    izip!(x, y.iter_mut()).for_each(|(&x, y)| {
        *y = a.mul_add(x, *y);
    });
}

/// out = a * x + y
#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+sse4.2", "aarch64+neon"))]
pub(crate) fn axpy_out(x: &[f64], y: &[f64], a: f64, out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(x, y, out.iter_mut()).for_each(|(&x, &y, out)| {
        *out = a.mul_add(x, y);
    });
}

/// ((p1 - n1) . x, (p1 - n1) . y)
#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+sse4.2", "aarch64+neon"))]
pub(crate) fn scalar_prods2(
    positive1: &[f64],
    negative1: &[f64],
    x: &[f64],
    y: &[f64],
) -> (f64, f64) {
    let n = positive1.len();
    assert!(negative1.len() == n);
    assert!(x.len() == n);
    assert!(y.len() == n);

    izip!(positive1, negative1, x, y).fold((0., 0.), |(s1, s2), (&a, &b, &x, &y)| {
        (s1 + x * (a - b), s2 + y * (a - b))
    })
}

/// ((p1 - n1 + p2) . x, (p1 - n1 + p2) . y)
#[multiversion(targets("x86_64+avx+avx2+fma", "x86_64+sse4.2", "aarch64+neon"))]
pub(crate) fn scalar_prods3(
    positive1: &[f64],
    negative1: &[f64],
    positive2: &[f64],
    x: &[f64],
    y: &[f64],
) -> (f64, f64) {
    let n = positive1.len();
    assert!(negative1.len() == n);
    assert!(positive2.len() == n);
    assert!(x.len() == n);
    assert!(y.len() == n);

    izip!(positive1, negative1, positive2, x, y).fold(
        (0., 0.),
        |(s1, s2), (&a, &b, &c, &x, &y)| (s1 + x * (a - b + c), s2 + y * (a - b + c)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn check_logaddexp(x in -10f64..10f64, y in -10f64..10f64) {
            let a = (x.exp() + y.exp()).ln();
            let b = logaddexp(x, y);
            let neginf = f64::NEG_INFINITY;
            let nan = f64::NAN;
            prop_assert!((a - b).abs() < 1e-10);
            prop_assert_eq!(b, logaddexp(y, x));
            prop_assert_eq!(x, logaddexp(x, neginf));
            prop_assert_eq!(logaddexp(neginf, neginf), neginf);
            prop_assert!(logaddexp(nan, x).is_nan());
        }
    }

    #[test]
    fn check_neginf() {
        assert_eq!(logaddexp(f64::NEG_INFINITY, 2.), 2.);
        assert_eq!(logaddexp(2., f64::NEG_INFINITY), 2.);
    }

    #[test]
    fn check_axpy() {
        let x = vec![1., 2., 3.];
        let mut y = vec![1., 1., 1.];
        axpy(&x, &mut y, 2.);
        assert_eq!(y, vec![3., 5., 7.]);

        let mut out = vec![0.; 3];
        axpy_out(&x, &[1., 1., 1.], -1., &mut out);
        assert_eq!(out, vec![0., -1., -2.]);
    }

    #[test]
    fn check_scalar_prods() {
        let a = vec![2., 4.];
        let b = vec![1., 1.];
        let c = vec![1., 0.];
        let x = vec![1., 2.];
        let y = vec![3., 1.];

        let (s1, s2) = scalar_prods2(&a, &b, &x, &y);
        assert_eq!(s1, 1. + 6.);
        assert_eq!(s2, 3. + 3.);

        let (s1, s2) = scalar_prods3(&a, &b, &c, &x, &y);
        assert_eq!(s1, 2. + 6.);
        assert_eq!(s2, 6. + 3.);
    }
}
